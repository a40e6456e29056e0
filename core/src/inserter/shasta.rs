use std::sync::Arc;

use alloy_primitives::{aliases::U48, B256};
use futures::future::try_join_all;
use taiko_driver_lib::{
    consts::{ANCHOR_V3_V4_GAS_LIMIT, BLOB_BYTES},
    input::{
        shasta::{anchorV4Call, u48_to_u64, Checkpoint, DerivationSource},
        ProposalMetadata, ShastaProposal,
    },
    manifest::{
        resolve_source_manifest, try_decompress_manifest, BlockManifest, ManifestContext,
        ProposalManifest, MANIFEST_HEADER_BYTES,
    },
    utils::{
        payload::shasta_difficulty,
        shasta::{encode_shasta_extra_data, shasta_base_fee, ParentGasInfo},
    },
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    common::{
        create_payload_and_set_head, is_known_canonical_batch, payload_attributes,
        update_l1_origin_for_blocks, wait_header, BlockFields,
    },
    BlockInserter, InserterContext,
};
use crate::{
    interfaces::{DriverError, DriverResult, DriverResultExt},
    preconf::{insert_preconf_blocks, PreconfEnvelope},
    provider::{
        BlockHeader, ExecutionEngine, L1DataSource, L1Origin, PayloadAttributes,
        ProtocolStateReader, VerifiedCheckpoint,
    },
};

/// Fetches and decodes the manifest of one derivation source.
///
/// Unusable proposer data yields the default manifest. Only a failure to
/// fetch the blobs at all is an error, so the proposal can be retried.
pub async fn fetch_source_manifest<L: L1DataSource>(
    l1: &L,
    source: &DerivationSource,
) -> DriverResult<ProposalManifest> {
    let slice = &source.blobSlice;
    if slice.blobHashes.is_empty() {
        warn!("derivation source without blobs, using default manifest");
        return Ok(ProposalManifest::default());
    }

    let data = match l1
        .blob_bytes(u48_to_u64(slice.timestamp), &slice.blobHashes)
        .await
    {
        Ok(data) => data,
        Err(e) if matches!(e.root(), DriverError::InvalidBlob(_)) => {
            warn!("invalid derivation source blobs: {e}, using default manifest");
            return Ok(ProposalManifest::default());
        }
        Err(e) => return Err(e),
    };

    let offset = slice.offset.to::<usize>();
    let max_offset = (BLOB_BYTES * slice.blobHashes.len()).saturating_sub(MANIFEST_HEADER_BYTES);
    if offset > max_offset {
        warn!("manifest offset {offset} beyond {max_offset}, using default manifest");
        return Ok(ProposalManifest::default());
    }
    Ok(try_decompress_manifest(&data, offset))
}

/// A block to build, resolved from its derivation source.
#[derive(Debug, Clone)]
struct ResolvedBlock {
    manifest: BlockManifest,
    is_forced_inclusion: bool,
}

/// Inserts Shasta proposals, anchored with `anchorV4`.
pub struct ShastaInserter<E, L, R> {
    ctx: Arc<InserterContext<E, L, R>>,
    lock: Mutex<()>,
}

impl<E, L, R> ShastaInserter<E, L, R>
where
    E: ExecutionEngine,
    L: L1DataSource,
    R: ProtocolStateReader,
{
    pub fn new(ctx: Arc<InserterContext<E, L, R>>) -> Self {
        Self {
            ctx,
            lock: Mutex::new(()),
        }
    }

    async fn insert_proposal(&self, proposal: &ShastaProposal) -> DriverResult<u64> {
        let _guard = self.lock.lock().await;
        let engine = &self.ctx.engine;
        let proposal_id = proposal.payload.proposal_id();
        if proposal_id == 0 {
            debug!("Skip the genesis Shasta proposal");
            return Ok(0);
        }

        let parent = self.resolve_parent(proposal_id).await?;
        let checkpoint = self.finalized_checkpoint(proposal).await?;

        let manifests = try_join_all(
            proposal
                .payload
                .derivation
                .sources
                .iter()
                .map(|source| fetch_source_manifest(&self.ctx.l1, source)),
        )
        .await
        .context_with(|| "failed to fetch derivation sources")?;
        let blocks = self.resolve_blocks(proposal, &parent, manifests).await?;
        if blocks.is_empty() {
            return Err(DriverError::NotFound("derivation sources".to_owned()));
        }
        let count = blocks.len();
        debug!(
            "Inserting Shasta proposal {proposal_id} with {count} blocks on parent {} ({})",
            parent.number(),
            parent.hash
        );

        let blocks = &blocks;
        match is_known_canonical_batch(engine, &parent, count, move |index, parent| {
            self.assemble(proposal, blocks, index, parent)
        })
        .await
        {
            Ok(last) => {
                info!(
                    "🧬 Known Shasta proposal {proposal_id} in canonical chain, last block {} ({})",
                    last.number(),
                    last.hash
                );
                self.ctx.notify(proposal_id, last.number(), false);
                update_l1_origin_for_blocks(
                    engine,
                    parent.number() + 1,
                    count,
                    proposal_id,
                    &proposal.l1,
                )
                .await
                .context_with(|| "failed to update L1 origin for proposal")?;
                return Ok(last.number());
            }
            Err(e) => debug!("Proposal {proposal_id} is not in the canonical chain: {e}"),
        }

        let mut parent = parent;
        for index in 0..count {
            let block_id = parent.number() + 1;
            let attributes = self
                .assemble(proposal, blocks, index, parent.clone())
                .await
                .context_with(|| format!("failed to assemble block {block_id}"))?;
            let payload = create_payload_and_set_head(engine, parent.hash, attributes, checkpoint)
                .await
                .context_with(|| format!("failed to insert block {block_id}"))?;
            parent = wait_header(engine, payload.block_number).await?;

            info!(
                "🔗 New Shasta L2 block inserted: block {}, hash {}, coinbase {}, transactions {}, timestamp {}, base fee {}, gas used {}, proposal {proposal_id}, index {index}",
                payload.block_number,
                payload.block_hash,
                payload.fee_recipient,
                blocks[index].manifest.transactions.len() + 1,
                payload.timestamp,
                payload.base_fee_per_gas,
                payload.gas_used,
            );
            self.ctx.metrics.set_l2_head_height(payload.block_number);
        }

        self.ctx.notify(proposal_id, parent.number(), true);
        Ok(parent.number())
    }

    async fn resolve_parent(&self, proposal_id: u64) -> DriverResult<BlockHeader> {
        let engine = &self.ctx.engine;
        let parent_number = if proposal_id == 1 {
            if self.ctx.spec.shasta_fork_timestamp() == 0 {
                0
            } else {
                self.ctx
                    .protocol
                    .last_pacaya_block_id()
                    .await
                    .context_with(|| "failed to fetch the last Pacaya block")?
            }
        } else {
            match engine.last_block_id_by_batch_id(proposal_id - 1).await? {
                Some(block_id) => block_id,
                None => {
                    let head = engine.head_header().await?;
                    warn!(
                        "No last block for proposal {}, building on head {}",
                        proposal_id - 1,
                        head.number()
                    );
                    return Ok(head);
                }
            }
        };
        engine
            .header_by_number(parent_number)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("parent block {parent_number}")))
    }

    /// The last block of the last finalized proposal, once this proposal is finalized.
    async fn finalized_checkpoint(
        &self,
        proposal: &ShastaProposal,
    ) -> DriverResult<Option<VerifiedCheckpoint>> {
        let finalized_id = proposal.payload.last_finalized_proposal_id();
        if finalized_id < proposal.payload.proposal_id() {
            return Ok(None);
        }
        let block_id = match self.ctx.engine.last_block_id_by_batch_id(finalized_id).await {
            Ok(Some(block_id)) => block_id,
            Ok(None) => {
                warn!("No last block for finalized proposal {finalized_id}");
                return Ok(None);
            }
            Err(e) => {
                warn!("Failed to fetch last block of finalized proposal {finalized_id}: {e}");
                return Ok(None);
            }
        };
        let header = self
            .ctx
            .engine
            .header_by_number(block_id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("finalized block {block_id}")))?;
        Ok(Some(VerifiedCheckpoint {
            block_id,
            block_hash: header.hash,
        }))
    }

    /// Validates every source against the blocks resolved before it and
    /// flattens them in order.
    async fn resolve_blocks(
        &self,
        proposal: &ShastaProposal,
        parent: &BlockHeader,
        manifests: Vec<ProposalManifest>,
    ) -> DriverResult<Vec<ResolvedBlock>> {
        let payload = &proposal.payload;
        let parent_state = self
            .ctx
            .protocol
            .shasta_block_state(parent.hash)
            .await
            .context_with(|| "failed to fetch parent anchor state")?;

        let mut ctx = ManifestContext {
            proposer: payload.proposal.proposer,
            proposal_timestamp: payload.proposal_timestamp(),
            origin_block_number: payload.origin_block_number(),
            fork_timestamp: self.ctx.spec.shasta_fork_timestamp(),
            is_forced_inclusion: false,
            parent_number: parent.number(),
            parent_timestamp: parent.inner.timestamp,
            parent_gas_limit: parent.inner.gas_limit,
            parent_anchor_block_number: u48_to_u64(parent_state.anchorBlockNumber),
        };

        let mut blocks = Vec::new();
        for (source, manifest) in payload.derivation.sources.iter().zip(manifests) {
            ctx.is_forced_inclusion = source.isForcedInclusion;
            let resolved = resolve_source_manifest(manifest, &ctx);
            if let Some(last) = resolved.blocks.last() {
                ctx.parent_number += resolved.blocks.len() as u64;
                ctx.parent_timestamp = last.timestamp;
                ctx.parent_gas_limit = last.gas_limit + ANCHOR_V3_V4_GAS_LIMIT;
                ctx.parent_anchor_block_number = last.anchor_block_number;
            }
            blocks.extend(resolved.blocks.into_iter().map(|manifest| ResolvedBlock {
                manifest,
                is_forced_inclusion: source.isForcedInclusion,
            }));
        }
        Ok(blocks)
    }

    async fn assemble(
        &self,
        proposal: &ShastaProposal,
        blocks: &[ResolvedBlock],
        index: usize,
        parent: BlockHeader,
    ) -> DriverResult<PayloadAttributes> {
        let block = blocks
            .get(index)
            .ok_or_else(|| DriverError::NotFound(format!("block {index} of proposal")))?;
        let manifest = &block.manifest;
        let payload = &proposal.payload;
        let block_id = parent.number() + 1;

        let first_shasta_block =
            parent.number() == 0 || parent.inner.timestamp < self.ctx.spec.shasta_fork_timestamp();
        let base_fee = shasta_base_fee(
            &ParentGasInfo {
                gas_limit: parent.inner.gas_limit,
                gas_used: parent.inner.gas_used,
                base_fee: parent.base_fee(),
                timestamp: parent.inner.timestamp,
            },
            manifest.timestamp,
            first_shasta_block,
        );
        debug!("L2 base fee for block {block_id}: {base_fee}");

        let parent_anchor = u48_to_u64(
            self.ctx
                .protocol
                .shasta_block_state(parent.hash)
                .await
                .context_with(|| "failed to fetch latest anchor state")?
                .anchorBlockNumber,
        );
        let anchor_block_number = manifest.anchor_block_number;
        let (anchor_hash, anchor_root) = if anchor_block_number > parent_anchor {
            let header = self
                .ctx
                .l1
                .header_by_number(anchor_block_number)
                .await
                .context_with(|| format!("failed to fetch anchor block {anchor_block_number}"))?;
            (header.hash, header.inner.state_root)
        } else {
            (B256::ZERO, B256::ZERO)
        };
        debug!(
            anchor_block_number,
            parent_anchor,
            hash = %anchor_hash,
            root = %anchor_root,
            "L2 anchor block"
        );

        let call = anchorV4Call {
            _checkpoint: Checkpoint {
                blockNumber: U48::from(anchor_block_number),
                blockHash: anchor_hash,
                stateRoot: anchor_root,
            },
        };
        let anchor = self
            .ctx
            .anchor
            .assemble(&self.ctx.engine, &parent, call.into(), base_fee as u128)
            .await?;

        let fields = BlockFields {
            timestamp: manifest.timestamp,
            coinbase: manifest.coinbase,
            difficulty: shasta_difficulty(parent.inner.difficulty, block_id),
            gas_limit: manifest.gas_limit,
            extra_data: encode_shasta_extra_data(
                payload.derivation.basefeeSharingPctg,
                proposal.is_low_bond,
            ),
            base_fee: base_fee as u128,
            batch_id: (index + 1 == blocks.len()).then(|| payload.proposal_id()),
            l1_origin: L1Origin {
                block_id,
                l1_block_height: Some(proposal.l1.block_height),
                l1_block_hash: proposal.l1.block_hash,
                is_forced_inclusion: block.is_forced_inclusion,
                ..Default::default()
            },
        };
        Ok(payload_attributes(
            parent.hash,
            fields,
            &anchor,
            &manifest.transactions,
        ))
    }
}

impl<E, L, R> BlockInserter for ShastaInserter<E, L, R>
where
    E: ExecutionEngine,
    L: L1DataSource,
    R: ProtocolStateReader,
{
    async fn insert_blocks(&self, proposal: &ProposalMetadata) -> DriverResult<u64> {
        let ProposalMetadata::Shasta(proposal) = proposal else {
            return Err(DriverError::InvalidConfig(format!(
                "{} metadata sent to the Shasta inserter",
                proposal.fork()
            )));
        };
        self.insert_proposal(proposal)
            .await
            .context_with(|| format!("proposal {}", proposal.payload.proposal_id()))
    }

    async fn insert_preconf_blocks_from_envelopes(
        &self,
        envelopes: &[PreconfEnvelope],
        from_cache: bool,
    ) -> DriverResult<Vec<BlockHeader>> {
        let _guard = self.lock.lock().await;
        insert_preconf_blocks(self.ctx.as_ref(), envelopes, from_cache, "Shasta").await
    }
}

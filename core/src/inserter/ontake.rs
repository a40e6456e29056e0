use std::sync::Arc;

use alloy_consensus::TxEnvelope;
use alloy_primitives::Bytes;
use taiko_driver_lib::{
    consts::BLOCK_MAX_TX_LIST_BYTES,
    input::{ontake::anchorV2Call, OntakeProposal, ProposalMetadata},
    utils::{txs::slice_tx_list, TxListDecompressor},
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{
    common::{
        create_payload_and_set_head, payload_attributes, verified_checkpoint, wait_header,
        BlockFields,
    },
    BlockInserter, InserterContext,
};
use crate::{
    interfaces::{DriverError, DriverResult, DriverResultExt},
    preconf::PreconfEnvelope,
    provider::{BlockHeader, ExecutionEngine, L1DataSource, L1Origin, ProtocolStateReader},
};

/// Inserts Ontake blocks, one per proposal, anchored with `anchorV2`.
pub struct OntakeInserter<E, L, R> {
    ctx: Arc<InserterContext<E, L, R>>,
    lock: Mutex<()>,
}

impl<E, L, R> OntakeInserter<E, L, R>
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

    async fn insert_block(&self, proposal: &OntakeProposal) -> DriverResult<u64> {
        let _guard = self.lock.lock().await;
        let engine = &self.ctx.engine;
        let meta = &proposal.meta;
        let block_id = meta.id;

        let parent_number = block_id
            .checked_sub(1)
            .ok_or_else(|| DriverError::InvalidConfig("Ontake block id 0".to_owned()))?;
        let parent = engine
            .header_by_number(parent_number)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("parent block {parent_number}")))?;

        let txs = self.fetch_txs(proposal).await?;
        let base_fee = self
            .ctx
            .protocol
            .base_fee_v2(&parent, meta.timestamp, &(&meta.baseFeeConfig).into())
            .await
            .context_with(|| "failed to calculate base fee")?;
        let anchor_header = self
            .ctx
            .l1
            .header_by_hash(meta.anchorBlockHash)
            .await
            .context_with(|| "failed to fetch anchor block")?;

        let call = anchorV2Call {
            _anchorBlockId: meta.anchorBlockId,
            _anchorStateRoot: anchor_header.inner.state_root,
            _parentGasUsed: u32::try_from(parent.inner.gas_used)
                .map_err(|e| anyhow::anyhow!("parent gas used: {e}"))?,
            _baseFeeConfig: meta.baseFeeConfig.clone(),
        };
        let anchor = self
            .ctx
            .anchor
            .assemble(engine, &parent, call.into(), base_fee)
            .await?;

        let fields = BlockFields {
            timestamp: meta.timestamp,
            coinbase: meta.coinbase,
            difficulty: meta.difficulty,
            gas_limit: meta.gasLimit as u64,
            extra_data: Bytes::copy_from_slice(meta.extraData.as_slice()),
            base_fee,
            batch_id: None,
            l1_origin: L1Origin {
                block_id,
                l1_block_height: Some(proposal.l1.block_height),
                l1_block_hash: proposal.l1.block_hash,
                ..Default::default()
            },
        };
        let attributes = payload_attributes(parent.hash, fields, &anchor, &txs);

        let checkpoint = verified_checkpoint(&self.ctx.protocol, block_id).await?;
        let payload = create_payload_and_set_head(engine, parent.hash, attributes, checkpoint)
            .await
            .context_with(|| format!("failed to insert block {block_id}"))?;
        let head = wait_header(engine, payload.block_number).await?;

        info!(
            "🔗 New Ontake L2 block inserted: block {}, hash {}, coinbase {}, transactions {}, timestamp {}, base fee {base_fee}, gas used {}",
            payload.block_number,
            payload.block_hash,
            payload.fee_recipient,
            txs.len() + 1,
            payload.timestamp,
            payload.gas_used,
        );
        self.ctx.metrics.set_l2_head_height(payload.block_number);
        self.ctx.notify(block_id, head.number(), true);
        Ok(head.number())
    }

    async fn fetch_txs(&self, proposal: &OntakeProposal) -> DriverResult<Vec<TxEnvelope>> {
        let meta = &proposal.meta;
        let decompressor = TxListDecompressor::new(BLOCK_MAX_TX_LIST_BYTES);
        if !meta.blobUsed {
            return Ok(decompressor.try_decompress(&proposal.calldata_tx_list, false));
        }

        let proposed_in = self
            .ctx
            .l1
            .header_by_number(proposal.l1.block_height)
            .await
            .context_with(|| format!("failed to fetch L1 block {}", proposal.l1.block_height))?;
        let data = match self
            .ctx
            .l1
            .blob_bytes(proposed_in.inner.timestamp, &[meta.blobHash])
            .await
        {
            Ok(data) => data,
            Err(e) if matches!(e.root(), DriverError::InvalidBlob(_)) => {
                warn!("invalid blob for block {}: {e}, use empty tx_list", meta.id);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        match slice_tx_list(
            &data,
            meta.blobTxListOffset as usize,
            meta.blobTxListLength as usize,
        ) {
            Some(compressed) => Ok(decompressor.try_decompress(compressed, true)),
            None => {
                warn!(
                    "blob slice [{}, +{}) out of {} bytes, use empty tx_list",
                    meta.blobTxListOffset,
                    meta.blobTxListLength,
                    data.len()
                );
                Ok(Vec::new())
            }
        }
    }
}

impl<E, L, R> BlockInserter for OntakeInserter<E, L, R>
where
    E: ExecutionEngine,
    L: L1DataSource,
    R: ProtocolStateReader,
{
    async fn insert_blocks(&self, proposal: &ProposalMetadata) -> DriverResult<u64> {
        let ProposalMetadata::Ontake(proposal) = proposal else {
            return Err(DriverError::InvalidConfig(format!(
                "{} metadata sent to the Ontake inserter",
                proposal.fork()
            )));
        };
        self.insert_block(proposal)
            .await
            .context_with(|| format!("Ontake block {}", proposal.meta.id))
    }

    async fn insert_preconf_blocks_from_envelopes(
        &self,
        _envelopes: &[PreconfEnvelope],
        _from_cache: bool,
    ) -> DriverResult<Vec<BlockHeader>> {
        Err(DriverError::Preconf(
            "preconfirmation blocks are not supported before Pacaya".to_owned(),
        ))
    }
}

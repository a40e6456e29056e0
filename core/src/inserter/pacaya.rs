use alloy_consensus::TxEnvelope;
use alloy_primitives::{Bytes, B256};
use std::sync::Arc;
use taiko_driver_lib::{
    consts::BLOCK_MAX_TX_LIST_BYTES,
    input::{pacaya::anchorV3Call, PacayaBatch, ProposalMetadata},
    utils::{
        pacaya::{block_timestamps, distribute_batch_txs},
        payload::pacaya_difficulty,
        txs::slice_tx_list,
        TxListDecompressor,
    },
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    common::{
        create_payload_and_set_head, is_known_canonical_batch, payload_attributes,
        update_l1_origin_for_blocks, verified_checkpoint, wait_header, BlockFields,
    },
    BlockInserter, InserterContext,
};
use crate::{
    interfaces::{DriverError, DriverResult, DriverResultExt},
    preconf::{insert_preconf_blocks, PreconfEnvelope},
    provider::{
        BlockHeader, ExecutionEngine, L1DataSource, L1Origin, PayloadAttributes,
        ProtocolStateReader,
    },
};

/// Inserts Pacaya batches, anchored with `anchorV3`.
pub struct PacayaInserter<E, L, R> {
    ctx: Arc<InserterContext<E, L, R>>,
    lock: Mutex<()>,
}

/// Per batch data every block of the batch is assembled from.
struct PreparedBatch<'b> {
    batch: &'b PacayaBatch,
    txs: Vec<Vec<TxEnvelope>>,
    timestamps: Vec<u64>,
    anchor_state_root: B256,
}

impl<E, L, R> PacayaInserter<E, L, R>
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

    async fn insert_batch(&self, batch: &PacayaBatch) -> DriverResult<u64> {
        let _guard = self.lock.lock().await;
        let engine = &self.ctx.engine;
        let batch_id = batch.batch_id();
        let count = batch.info.blocks.len();
        if count == 0 {
            return Err(DriverError::NotFound("blocks in batch".to_owned()));
        }

        let parent = self.resolve_parent(batch).await?;
        debug!(
            "Inserting Pacaya batch {batch_id} with {count} blocks on parent {} ({})",
            parent.number(),
            parent.hash
        );

        let all_txs = self.fetch_txs(batch).await?;
        let anchor_header = self
            .ctx
            .l1
            .header_by_hash(batch.info.anchorBlockHash)
            .await
            .context_with(|| "failed to fetch anchor block")?;
        let prepared = PreparedBatch {
            batch,
            txs: distribute_batch_txs(&all_txs, &batch.info),
            timestamps: block_timestamps(&batch.info),
            anchor_state_root: anchor_header.inner.state_root,
        };
        let prepared = &prepared;

        match is_known_canonical_batch(engine, &parent, count, move |index, parent| {
            self.assemble(prepared, index, parent)
        })
        .await
        {
            Ok(last) => {
                info!(
                    "🧬 Known Pacaya batch {batch_id} in canonical chain, last block {} ({})",
                    last.number(),
                    last.hash
                );
                self.ctx.notify(batch_id, last.number(), false);
                update_l1_origin_for_blocks(
                    engine,
                    batch.block_id(0),
                    count,
                    batch_id,
                    &batch.l1,
                )
                .await
                .context_with(|| "failed to update L1 origin for batch")?;
                return Ok(last.number());
            }
            Err(e) => debug!("Batch {batch_id} is not in the canonical chain: {e}"),
        }

        let checkpoint = verified_checkpoint(&self.ctx.protocol, parent.number() + 1).await?;
        let mut parent = parent;
        for index in 0..count {
            let block_id = parent.number() + 1;
            let attributes = self
                .assemble(prepared, index, parent.clone())
                .await
                .context_with(|| format!("failed to assemble block {block_id}"))?;
            let payload = create_payload_and_set_head(engine, parent.hash, attributes, checkpoint)
                .await
                .context_with(|| format!("failed to insert block {block_id}"))?;
            parent = wait_header(engine, payload.block_number).await?;

            info!(
                "🔗 New Pacaya L2 block inserted: block {}, hash {}, coinbase {}, transactions {}, timestamp {}, gas used {}, batch {batch_id}, index {index}",
                payload.block_number,
                payload.block_hash,
                payload.fee_recipient,
                prepared.txs[index].len() + 1,
                payload.timestamp,
                payload.gas_used,
            );
            self.ctx.metrics.set_l2_head_height(payload.block_number);
        }

        self.ctx.notify(batch_id, parent.number(), true);
        Ok(parent.number())
    }

    async fn resolve_parent(&self, batch: &PacayaBatch) -> DriverResult<BlockHeader> {
        let batch_id = batch.batch_id();
        let previous_batch_id = batch_id.saturating_sub(1);
        // The first Pacaya batch id is the fork height, its parent is the last Ontake block.
        let parent_number = if self.ctx.spec.pacaya_fork_height() == Some(batch_id) {
            previous_batch_id
        } else {
            self.ctx
                .protocol
                .batch_last_block_id(previous_batch_id)
                .await
                .context_with(|| format!("failed to fetch batch {previous_batch_id}"))?
        };
        self.ctx
            .engine
            .header_by_number(parent_number)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("parent block {parent_number}")))
    }

    async fn fetch_txs(&self, batch: &PacayaBatch) -> DriverResult<Vec<TxEnvelope>> {
        let info = &batch.info;
        let decompressor = TxListDecompressor::new(BLOCK_MAX_TX_LIST_BYTES);
        if info.blobHashes.is_empty() {
            return Ok(decompressor.try_decompress(&batch.calldata_tx_list, false));
        }

        let created_in = self
            .ctx
            .l1
            .header_by_number(info.blobCreatedIn)
            .await
            .context_with(|| format!("failed to fetch blob block {}", info.blobCreatedIn))?;
        let data = match self
            .ctx
            .l1
            .blob_bytes(created_in.inner.timestamp, &info.blobHashes)
            .await
        {
            Ok(data) => data,
            Err(e) if matches!(e.root(), DriverError::InvalidBlob(_)) => {
                warn!("invalid blobs for batch {}: {e}, use empty tx_list", batch.batch_id());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let Some(compressed) = slice_tx_list(
            &data,
            info.blobByteOffset as usize,
            info.blobByteSize as usize,
        ) else {
            warn!(
                "blob slice [{}, +{}) out of {} bytes, use empty tx_list",
                info.blobByteOffset,
                info.blobByteSize,
                data.len()
            );
            return Ok(Vec::new());
        };
        Ok(decompressor.try_decompress(compressed, true))
    }

    async fn assemble(
        &self,
        prepared: &PreparedBatch<'_>,
        index: usize,
        parent: BlockHeader,
    ) -> DriverResult<PayloadAttributes> {
        let info = &prepared.batch.info;
        let block = info
            .blocks
            .get(index)
            .ok_or_else(|| DriverError::NotFound(format!("block {index} of batch")))?;
        let block_id = parent.number() + 1;
        let timestamp = prepared.timestamps[index];

        let base_fee = self
            .ctx
            .protocol
            .base_fee_v2(&parent, timestamp, &info.baseFeeConfig)
            .await
            .context_with(|| "failed to calculate base fee")?;
        debug!(
            "L2 base fee for block {block_id}: {base_fee}, parent {} gas used {}, batch {}, index {index}",
            parent.number(),
            parent.inner.gas_used,
            prepared.batch.batch_id()
        );

        let call = anchorV3Call {
            _anchorBlockId: info.anchorBlockId,
            _anchorStateRoot: prepared.anchor_state_root,
            _parentGasUsed: u32::try_from(parent.inner.gas_used)
                .map_err(|e| anyhow::anyhow!("parent gas used: {e}"))?,
            _baseFeeConfig: info.baseFeeConfig.clone(),
            _signalSlots: block.signalSlots.clone(),
        };
        let anchor = self
            .ctx
            .anchor
            .assemble(&self.ctx.engine, &parent, call.into(), base_fee)
            .await?;

        let fields = BlockFields {
            timestamp,
            coinbase: info.coinbase,
            difficulty: pacaya_difficulty(block_id),
            gas_limit: info.gasLimit as u64,
            extra_data: Bytes::copy_from_slice(info.extraData.as_slice()),
            base_fee,
            batch_id: Some(prepared.batch.batch_id()),
            l1_origin: L1Origin {
                block_id,
                l1_block_height: Some(prepared.batch.l1.block_height),
                l1_block_hash: prepared.batch.l1.block_hash,
                ..Default::default()
            },
        };
        Ok(payload_attributes(
            parent.hash,
            fields,
            &anchor,
            &prepared.txs[index],
        ))
    }
}

impl<E, L, R> BlockInserter for PacayaInserter<E, L, R>
where
    E: ExecutionEngine,
    L: L1DataSource,
    R: ProtocolStateReader,
{
    async fn insert_blocks(&self, proposal: &ProposalMetadata) -> DriverResult<u64> {
        let ProposalMetadata::Pacaya(batch) = proposal else {
            return Err(DriverError::InvalidConfig(format!(
                "{} metadata sent to the Pacaya inserter",
                proposal.fork()
            )));
        };
        self.insert_batch(batch)
            .await
            .context_with(|| format!("batch {}", batch.batch_id()))
    }

    async fn insert_preconf_blocks_from_envelopes(
        &self,
        envelopes: &[PreconfEnvelope],
        from_cache: bool,
    ) -> DriverResult<Vec<BlockHeader>> {
        let _guard = self.lock.lock().await;
        insert_preconf_blocks(self.ctx.as_ref(), envelopes, from_cache, "Pacaya").await
    }
}

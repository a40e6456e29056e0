use alloy_primitives::{keccak256, Bytes, FixedBytes};
use serde::{Deserialize, Serialize};
use taiko_driver_lib::{
    consts::{BLOCK_MAX_TX_LIST_BYTES, MAX_DECOMPRESSION_FACTOR},
    utils::{payload::BuildPayloadArgs, zlib_decompress_bounded},
};
use tracing::{debug, info};

use crate::{
    inserter::{
        common::{create_payload_and_set_head, verified_checkpoint},
        InserterContext,
    },
    interfaces::{DriverError, DriverResult, DriverResultExt},
    observer::MetricsSink,
    provider::{
        BlockHeader, BlockMetadata, ExecutableData, ExecutionEngine, L1Origin, PayloadAttributes,
        ProtocolStateReader,
    },
};

/// A block built by a preconfer, as gossiped between nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconfEnvelope {
    /// `transactions[0]` is the zlib compressed tx list, anchor included.
    pub payload: ExecutableData,
    #[serde(default)]
    pub signature: Option<FixedBytes<65>>,
    #[serde(default)]
    pub is_forced_inclusion: bool,
}

/// Inserts `envelopes` in order. Callers hold the inserter lock.
pub(crate) async fn insert_preconf_blocks<E, L, R>(
    ctx: &InserterContext<E, L, R>,
    envelopes: &[PreconfEnvelope],
    from_cache: bool,
    fork: &str,
) -> DriverResult<Vec<BlockHeader>>
where
    E: ExecutionEngine,
    R: ProtocolStateReader,
{
    debug!(
        "Insert preconfirmation blocks from envelopes: {} blocks, from cache: {from_cache}",
        envelopes.len()
    );
    let mut headers = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        let block_id = envelope.payload.block_number;
        let header = insert_preconf_block_from_envelope(
            &ctx.engine,
            &ctx.protocol,
            ctx.metrics.as_ref(),
            envelope,
        )
        .await
        .context_with(|| format!("failed to insert preconfirmation block {block_id}"))?;
        info!(
            "⏰ New preconfirmation L2 block inserted: block {}, hash {}, fork {fork}, coinbase {}, timestamp {}, gas used {}, from cache: {from_cache}",
            header.number(),
            header.hash,
            header.inner.beneficiary,
            header.inner.timestamp,
            header.inner.gas_used,
        );
        headers.push(header);
    }
    Ok(headers)
}

/// Inserts one preconfirmed block and makes it the head.
pub async fn insert_preconf_block_from_envelope<E, R>(
    engine: &E,
    protocol: &R,
    metrics: &dyn MetricsSink,
    envelope: &PreconfEnvelope,
) -> DriverResult<BlockHeader>
where
    E: ExecutionEngine,
    R: ProtocolStateReader,
{
    let payload = &envelope.payload;
    let block_id = payload.block_number;
    let signature = envelope.signature.unwrap_or_default();
    debug!(
        block_id,
        hash = %payload.block_hash,
        parent_hash = %payload.parent_hash,
        timestamp = payload.timestamp,
        fee_recipient = %payload.fee_recipient,
        "inserting preconfirmation block from envelope"
    );

    // Only the genesis block has no head L1 origin.
    if let Some(head_l1_origin) = engine.head_l1_origin().await? {
        if block_id <= head_l1_origin.block_id {
            return Err(DriverError::Preconf(format!(
                "block ({block_id}, {}) is not above the head L1 origin block {}",
                payload.block_hash, head_l1_origin.block_id
            )));
        }
        if !is_based_on_canonical_chain(engine, payload, &head_l1_origin).await? {
            return Err(DriverError::Preconf(format!(
                "block ({block_id}, {}) is not in the canonical chain, head L1 origin: ({}, {})",
                payload.block_hash, head_l1_origin.block_id, head_l1_origin.l2_block_hash
            )));
        }
    }

    let compressed = payload
        .transactions
        .first()
        .ok_or_else(|| DriverError::NotFound("transactions data in the payload".to_owned()))?;
    let tx_list =
        zlib_decompress_bounded(compressed, BLOCK_MAX_TX_LIST_BYTES * MAX_DECOMPRESSION_FACTOR)
            .map_err(|e| e.context("failed to decompress transactions list bytes"))?;

    let payload_id = BuildPayloadArgs {
        parent: payload.parent_hash,
        timestamp: payload.timestamp,
        fee_recipient: payload.fee_recipient,
        random: payload.prev_randao,
        tx_list_hash: keccak256(&tx_list),
    }
    .id();
    debug!(block_id, payload_id = %FixedBytes::from(payload_id), "payload arguments");

    let attributes = PayloadAttributes {
        timestamp: payload.timestamp,
        prev_randao: payload.prev_randao,
        suggested_fee_recipient: payload.fee_recipient,
        withdrawals: Vec::new(),
        block_metadata: BlockMetadata {
            beneficiary: payload.fee_recipient,
            gas_limit: payload.gas_limit,
            timestamp: payload.timestamp,
            tx_list: Bytes::from(tx_list),
            mix_hash: payload.prev_randao,
            extra_data: payload.extra_data.clone(),
            batch_id: None,
        },
        base_fee_per_gas: payload.base_fee_per_gas,
        l1_origin: L1Origin {
            block_id,
            l1_block_height: None,
            signature,
            is_forced_inclusion: envelope.is_forced_inclusion,
            build_payload_args_id: FixedBytes::from(payload_id),
            ..Default::default()
        },
    };

    let checkpoint = verified_checkpoint(protocol, block_id).await?;
    let built = create_payload_and_set_head(engine, payload.parent_hash, attributes, checkpoint)
        .await
        .context_with(|| "failed to create execution data")?;
    metrics.set_l2_preconf_head_height(block_id);

    engine
        .header_by_hash(built.block_hash)
        .await?
        .ok_or_else(|| DriverError::NotFound(format!("L2 block {}", built.block_hash)))
}

/// Whether `payload` extends the chain through the block of the head L1 origin.
pub async fn is_based_on_canonical_chain<E: ExecutionEngine>(
    engine: &E,
    payload: &ExecutableData,
    head_l1_origin: &L1Origin,
) -> DriverResult<bool> {
    if let Some(canonical_parent) = engine
        .header_by_number(payload.block_number.saturating_sub(1))
        .await?
    {
        if canonical_parent.hash == payload.parent_hash {
            return Ok(true);
        }
    }

    let mut current = engine
        .header_by_hash(payload.parent_hash)
        .await?
        .ok_or_else(|| DriverError::NotFound(format!("parent block {}", payload.parent_hash)))?;
    while current.number() > head_l1_origin.block_id {
        let parent_hash = current.inner.parent_hash;
        current = engine
            .header_by_hash(parent_hash)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("parent block {parent_hash}")))?;
    }

    let based = current.hash == head_l1_origin.l2_block_hash;
    debug!(
        block_id = payload.block_number,
        parent_hash = %payload.parent_hash,
        head_l1_origin = head_l1_origin.block_id,
        based,
        "checked if block is based on canonical chain"
    );
    Ok(based)
}

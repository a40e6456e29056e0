//! Payload assembly, commit and idempotence primitives shared by all forks.

use std::{fmt::Debug, future::Future, time::Duration};

use alloy_consensus::{
    constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH},
    Transaction, TxEnvelope,
};
use alloy_primitives::{Address, Bytes, FixedBytes, B256, U256};
use futures::future::try_join_all;
use taiko_driver_lib::{
    input::L1Inclusion,
    utils::{
        decode_transactions,
        payload::{encode_tx_list, tx_list_hash, BuildPayloadArgs},
    },
};
use tracing::{debug, info};

use crate::{
    interfaces::{DriverError, DriverResult, DriverResultExt},
    provider::{
        BlockHeader, BlockMetadata, ExecutableData, ExecutionEngine, ForkchoiceState, L1Origin,
        PayloadAttributes, ProtocolStateReader, VerifiedCheckpoint,
    },
};

const WAIT_HEADER_INTERVAL: Duration = Duration::from_millis(200);
const WAIT_HEADER_ATTEMPTS: usize = 150;

/// Fork independent description of a block to build on top of a parent.
#[derive(Debug, Clone, Default)]
pub struct BlockFields {
    pub timestamp: u64,
    pub coinbase: Address,
    /// Used as both `prevRandao` and the header's mix digest.
    pub difficulty: B256,
    /// Gas available to the block's transactions, the anchor is added on top.
    pub gas_limit: u64,
    pub extra_data: Bytes,
    pub base_fee: u128,
    pub batch_id: Option<u64>,
    pub l1_origin: L1Origin,
}

/// Payload attributes for `fields` with the anchor prepended to `txs`.
///
/// The L1 origin carries the payload id the engine will derive for them.
pub fn payload_attributes(
    parent_hash: B256,
    fields: BlockFields,
    anchor: &TxEnvelope,
    txs: &[TxEnvelope],
) -> PayloadAttributes {
    let tx_list = encode_tx_list(anchor, txs);
    let mut l1_origin = fields.l1_origin;
    l1_origin.build_payload_args_id = FixedBytes::from(
        BuildPayloadArgs {
            parent: parent_hash,
            timestamp: fields.timestamp,
            fee_recipient: fields.coinbase,
            random: fields.difficulty,
            tx_list_hash: tx_list_hash(&tx_list),
        }
        .id(),
    );

    PayloadAttributes {
        timestamp: fields.timestamp,
        prev_randao: fields.difficulty,
        suggested_fee_recipient: fields.coinbase,
        withdrawals: Vec::new(),
        block_metadata: BlockMetadata {
            beneficiary: fields.coinbase,
            gas_limit: fields.gas_limit + anchor.gas_limit(),
            timestamp: fields.timestamp,
            tx_list,
            mix_hash: fields.difficulty,
            extra_data: fields.extra_data,
            batch_id: fields.batch_id,
        },
        base_fee_per_gas: U256::from(fields.base_fee),
        l1_origin,
    }
}

/// Builds a payload on `parent_hash`, executes it and makes it the new head.
pub async fn create_payload_and_set_head<E: ExecutionEngine>(
    engine: &E,
    parent_hash: B256,
    attributes: PayloadAttributes,
    checkpoint: Option<VerifiedCheckpoint>,
) -> DriverResult<ExecutableData> {
    let payload = create_execution_payloads(engine, parent_hash, attributes)
        .await
        .context_with(|| "failed to create execution payloads")?;

    let safe = checkpoint.map(|c| c.block_hash).unwrap_or_default();
    let updated = engine
        .forkchoice_updated(
            ForkchoiceState {
                head_block_hash: payload.block_hash,
                safe_block_hash: safe,
                finalized_block_hash: safe,
            },
            None,
        )
        .await
        .context_with(|| "failed to update fork choice")?;
    if !updated.payload_status.is_valid() {
        return Err(DriverError::Engine(format!(
            "unexpected ForkchoiceUpdate response status: {}",
            updated.payload_status.status
        )));
    }
    Ok(payload)
}

async fn create_execution_payloads<E: ExecutionEngine>(
    engine: &E,
    parent_hash: B256,
    attributes: PayloadAttributes,
) -> DriverResult<ExecutableData> {
    let block_id = attributes.l1_origin.block_id;
    debug!(
        block_id,
        timestamp = attributes.timestamp,
        random = %attributes.prev_randao,
        fee_recipient = %attributes.suggested_fee_recipient,
        gas_limit = attributes.block_metadata.gas_limit,
        base_fee = %attributes.base_fee_per_gas,
        extra_data = %attributes.block_metadata.extra_data,
        l1_origin_height = ?attributes.l1_origin.l1_block_height,
        "payload attributes"
    );

    let updated = engine
        .forkchoice_updated(
            ForkchoiceState {
                head_block_hash: parent_hash,
                ..Default::default()
            },
            Some(attributes),
        )
        .await?;
    if !updated.payload_status.is_valid() {
        return Err(DriverError::Engine(format!(
            "unexpected ForkchoiceUpdate response status: {}",
            updated.payload_status.status
        )));
    }
    let payload_id = updated
        .payload_id
        .ok_or_else(|| DriverError::Engine("empty payload ID".to_owned()))?;

    let payload = engine.get_payload(payload_id.0).await?;
    debug!(
        block_id,
        number = payload.block_number,
        hash = %payload.block_hash,
        gas_used = payload.gas_used,
        "payload built"
    );

    let status = engine.new_payload(&payload).await?;
    if !status.is_valid() {
        return Err(DriverError::Engine(format!(
            "unexpected NewPayload response status: {}{}",
            status.status,
            status
                .validation_error
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        )));
    }
    Ok(payload)
}

/// Polls the engine until block `number` is visible.
pub async fn wait_header<E: ExecutionEngine>(engine: &E, number: u64) -> DriverResult<BlockHeader> {
    for _ in 0..WAIT_HEADER_ATTEMPTS {
        if let Some(header) = engine.header_by_number(number).await? {
            return Ok(header);
        }
        tokio::time::sleep(WAIT_HEADER_INTERVAL).await;
    }
    Err(DriverError::NotFound(format!(
        "L2 block {number} after {WAIT_HEADER_ATTEMPTS} attempts"
    )))
}

async fn header_at<E: ExecutionEngine>(engine: &E, number: u64) -> DriverResult<BlockHeader> {
    engine
        .header_by_number(number)
        .await?
        .ok_or_else(|| DriverError::NotFound(format!("L2 block {number}")))
}

/// The last verified block, when `block_id` is beyond it.
pub async fn verified_checkpoint<R: ProtocolStateReader>(
    protocol: &R,
    block_id: u64,
) -> DriverResult<Option<VerifiedCheckpoint>> {
    Ok(protocol
        .last_verified_block()
        .await
        .context_with(|| "failed to fetch last verified block")?
        .filter(|checkpoint| block_id > checkpoint.block_id))
}

/// Checks that all `count` blocks following `parent` are already on the
/// canonical chain, returning the last one.
///
/// `assemble` rebuilds the attributes of the `index`-th block given the
/// canonical header it sits on. Blocks are checked concurrently.
pub async fn is_known_canonical_batch<E, F, Fut>(
    engine: &E,
    parent: &BlockHeader,
    count: usize,
    assemble: F,
) -> DriverResult<BlockHeader>
where
    E: ExecutionEngine,
    F: Fn(usize, BlockHeader) -> Fut,
    Fut: Future<Output = DriverResult<PayloadAttributes>>,
{
    let assemble = &assemble;
    let headers = try_join_all((0..count).map(|index| async move {
        let number = parent.number() + index as u64;
        let block_parent = header_at(engine, number).await?;
        let attributes = assemble(index, block_parent.clone()).await?;
        is_known_canonical_block(engine, &block_parent, &attributes)
            .await
            .context_with(|| format!("block {} is an unknown block", number + 1))
    }))
    .await?;
    headers
        .into_iter()
        .last()
        .ok_or_else(|| DriverError::NotFound("blocks in an empty batch".to_owned()))
}

fn ensure_same<T: PartialEq + Debug>(field: &str, local: T, derived: T) -> DriverResult<()> {
    if local == derived {
        Ok(())
    } else {
        Err(DriverError::UnknownBlock(format!(
            "{field} mismatch: {local:?} != {derived:?}"
        )))
    }
}

/// The block must start with the derived anchor and carry exactly the derived transactions.
async fn ensure_transactions<E: ExecutionEngine>(
    engine: &E,
    block_id: u64,
    tx_list: &[u8],
) -> DriverResult<()> {
    let local = engine
        .transaction_hashes_by_number(block_id)
        .await?
        .ok_or_else(|| DriverError::NotFound(format!("transactions of block {block_id}")))?;
    let derived: Vec<B256> = decode_transactions(tx_list)
        .iter()
        .map(|tx| *tx.tx_hash())
        .collect();
    let (Some(local_anchor), Some(derived_anchor)) = (local.first(), derived.first()) else {
        return Err(DriverError::UnknownBlock("transactions list is empty".to_owned()));
    };
    ensure_same("anchor transaction", local_anchor, derived_anchor)?;
    ensure_same("transactions", &local, &derived)
}

/// Whether the child of `parent` on the local chain is the block `attributes` describe.
pub async fn is_known_canonical_block<E: ExecutionEngine>(
    engine: &E,
    parent: &BlockHeader,
    attributes: &PayloadAttributes,
) -> DriverResult<BlockHeader> {
    let block_id = parent.number() + 1;
    let block = header_at(engine, block_id).await?;
    let l1_origin = engine
        .l1_origin_by_id(block_id)
        .await?
        .ok_or(DriverError::MissingL1Origin(block_id))?;

    let payload_id = attributes.l1_origin.build_payload_args_id;
    if l1_origin.build_payload_args_id != FixedBytes::ZERO
        && l1_origin.build_payload_args_id != payload_id
    {
        return Err(DriverError::UnknownBlock(format!(
            "payload ID for block {block_id} mismatch: stored {}, derived {payload_id}",
            l1_origin.build_payload_args_id
        )));
    }

    let meta = &attributes.block_metadata;
    let header = &block.inner;
    ensure_same("parent hash", header.parent_hash, parent.hash)?;
    ensure_transactions(engine, block_id, &meta.tx_list).await?;
    ensure_same("uncle hash", header.ommers_hash, EMPTY_OMMER_ROOT_HASH)?;
    ensure_same("coinbase", header.beneficiary, meta.beneficiary)?;
    ensure_same("difficulty", header.difficulty, U256::ZERO)?;
    ensure_same("mix digest", header.mix_hash, meta.mix_hash)?;
    ensure_same("block number", header.number, block_id)?;
    ensure_same("gas limit", header.gas_limit, meta.gas_limit)?;
    ensure_same("timestamp", header.timestamp, meta.timestamp)?;
    ensure_same("extra data", &header.extra_data, &meta.extra_data)?;
    ensure_same(
        "base fee",
        U256::from(block.base_fee()),
        attributes.base_fee_per_gas,
    )?;
    ensure_same(
        "withdrawals root",
        header.withdrawals_root.unwrap_or(EMPTY_ROOT_HASH),
        EMPTY_ROOT_HASH,
    )?;
    Ok(block)
}

/// Points the L1 origin of `count` consecutive blocks at the L1 block `l1`,
/// then moves the head L1 origin and the batch mapping to the last one.
pub async fn update_l1_origin_for_blocks<E: ExecutionEngine>(
    engine: &E,
    first_block_id: u64,
    count: usize,
    batch_id: u64,
    l1: &L1Inclusion,
) -> DriverResult<()> {
    if count == 0 {
        return Ok(());
    }
    try_join_all((0..count as u64).map(|index| async move {
        let block_id = first_block_id + index;
        let header = header_at(engine, block_id).await?;
        let mut l1_origin = L1Origin {
            block_id,
            l2_block_hash: header.hash,
            l1_block_height: Some(l1.block_height),
            l1_block_hash: l1.block_hash,
            ..Default::default()
        };
        // Blocks from beacon sync have no stored origin.
        if let Some(stored) = engine.l1_origin_by_id(block_id).await? {
            l1_origin.build_payload_args_id = stored.build_payload_args_id;
            l1_origin.signature = stored.signature;
            l1_origin.is_forced_inclusion = stored.is_forced_inclusion;
        }
        engine
            .update_l1_origin(&l1_origin)
            .await
            .context_with(|| format!("failed to update L1 origin of block {block_id}"))
    }))
    .await?;

    let last_block_id = first_block_id + count as u64 - 1;
    info!(
        "Update head L1 origin: block {last_block_id}, batch {batch_id}, L1 block {} ({})",
        l1.block_height, l1.block_hash
    );
    engine
        .set_head_l1_origin(last_block_id)
        .await
        .context_with(|| "failed to write head L1 origin")?;
    engine
        .set_batch_to_last_block(batch_id, last_block_id)
        .await
        .context_with(|| "failed to write batch to block mapping")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        mem::{MemEngine, StaticProtocolReader},
        PayloadStatusKind,
    };
    use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
    use alloy_primitives::{PrimitiveSignature, TxKind};
    use pretty_assertions::assert_eq;

    fn anchor() -> TxEnvelope {
        let tx = TxEip1559 {
            chain_id: 167,
            gas_limit: 1_000_000,
            to: TxKind::Call(Address::repeat_byte(0x16)),
            ..Default::default()
        };
        let signature = PrimitiveSignature::new(U256::from(1u64), U256::from(2u64), false);
        tx.into_signed(signature).into()
    }

    fn transfer() -> TxEnvelope {
        let tx = TxEip1559 {
            chain_id: 167,
            nonce: 1,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x42)),
            ..Default::default()
        };
        let signature = PrimitiveSignature::new(U256::from(1u64), U256::from(2u64), false);
        tx.into_signed(signature).into()
    }

    fn fields(timestamp: u64) -> BlockFields {
        BlockFields {
            timestamp,
            coinbase: Address::repeat_byte(0xc0),
            difficulty: B256::repeat_byte(0xd1),
            gas_limit: 15_000_000,
            extra_data: Bytes::from_static(&[75, 0]),
            base_fee: 10_000_000,
            batch_id: Some(1),
            l1_origin: L1Origin {
                block_id: 1,
                l1_block_height: Some(100),
                l1_block_hash: B256::repeat_byte(0x11),
                ..Default::default()
            },
        }
    }

    #[test]
    fn attributes_reserve_anchor_gas_and_carry_payload_id() {
        let parent = B256::repeat_byte(0xaa);
        let attributes = payload_attributes(parent, fields(12), &anchor(), &[]);
        assert_eq!(attributes.block_metadata.gas_limit, 16_000_000);
        assert_eq!(attributes.block_metadata.mix_hash, attributes.prev_randao);

        let expected = BuildPayloadArgs {
            parent,
            timestamp: 12,
            fee_recipient: Address::repeat_byte(0xc0),
            random: B256::repeat_byte(0xd1),
            tx_list_hash: tx_list_hash(&attributes.block_metadata.tx_list),
        }
        .id();
        assert_eq!(attributes.l1_origin.build_payload_args_id.0, expected);
    }

    #[tokio::test]
    async fn commit_then_recognise_block() {
        let engine = MemEngine::with_genesis(30_000_000, 0);
        let genesis = engine.head_header().await.unwrap();
        let attributes = payload_attributes(genesis.hash, fields(12), &anchor(), &[]);

        let payload = create_payload_and_set_head(&engine, genesis.hash, attributes.clone(), None)
            .await
            .unwrap();
        assert_eq!(payload.parent_hash, genesis.hash);
        assert_eq!(engine.head_header().await.unwrap().hash, payload.block_hash);

        let known = is_known_canonical_block(&engine, &genesis, &attributes)
            .await
            .unwrap();
        assert_eq!(known.hash, payload.block_hash);

        let mut other = attributes;
        other.block_metadata.timestamp = 13;
        assert!(matches!(
            is_known_canonical_block(&engine, &genesis, &other).await,
            Err(DriverError::UnknownBlock(_))
        ));
    }

    #[tokio::test]
    async fn other_transactions_are_unknown_without_payload_id() {
        let engine = MemEngine::with_genesis(30_000_000, 0);
        let genesis = engine.head_header().await.unwrap();
        let attributes = payload_attributes(genesis.hash, fields(12), &anchor(), &[]);
        create_payload_and_set_head(&engine, genesis.hash, attributes, None)
            .await
            .unwrap();
        engine.insert_l1_origin(L1Origin {
            build_payload_args_id: FixedBytes::ZERO,
            ..engine.l1_origin(1).unwrap()
        });

        let other = payload_attributes(genesis.hash, fields(12), &anchor(), &[transfer()]);
        let err = is_known_canonical_block(&engine, &genesis, &other)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::UnknownBlock(msg) if msg.starts_with("transactions")));

        engine.set_transaction_hashes(1, Vec::new());
        let err = is_known_canonical_block(&engine, &genesis, &other)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::UnknownBlock(msg) if msg.contains("empty")));
    }

    #[tokio::test]
    async fn rejected_payload_is_an_error() {
        let engine = MemEngine::with_genesis(30_000_000, 0);
        let genesis = engine.head_header().await.unwrap();
        engine.set_new_payload_status(PayloadStatusKind::Invalid);
        let attributes = payload_attributes(genesis.hash, fields(12), &anchor(), &[]);
        let err = create_payload_and_set_head(&engine, genesis.hash, attributes, None)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), DriverError::Engine(msg) if msg.contains("INVALID")));
        assert_eq!(engine.head_header().await.unwrap().hash, genesis.hash);
    }

    #[tokio::test]
    async fn unknown_parent_is_not_valid() {
        let engine = MemEngine::with_genesis(30_000_000, 0);
        let attributes = payload_attributes(B256::repeat_byte(9), fields(12), &anchor(), &[]);
        let err = create_payload_and_set_head(&engine, B256::repeat_byte(9), attributes, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SYNCING"));
    }

    #[tokio::test]
    async fn block_without_origin_is_unknown() {
        let engine = MemEngine::with_genesis(30_000_000, 0);
        let genesis = engine.head_header().await.unwrap();
        let attributes = payload_attributes(genesis.hash, fields(12), &anchor(), &[]);
        create_payload_and_set_head(&engine, genesis.hash, attributes.clone(), None)
            .await
            .unwrap();
        // A fresh engine sharing the chain but not the origins, as after beacon sync.
        let synced = MemEngine::with_genesis(30_000_000, 0);
        synced.insert_canonical(engine.header_by_number(1).await.unwrap().unwrap());
        assert!(matches!(
            is_known_canonical_block(&synced, &genesis, &attributes).await,
            Err(DriverError::MissingL1Origin(1))
        ));
    }

    #[tokio::test]
    async fn l1_origin_refresh_keeps_payload_id() {
        let engine = MemEngine::with_genesis(30_000_000, 0);
        let genesis = engine.head_header().await.unwrap();
        let attributes = payload_attributes(genesis.hash, fields(12), &anchor(), &[]);
        let payload_id = attributes.l1_origin.build_payload_args_id;
        create_payload_and_set_head(&engine, genesis.hash, attributes, None)
            .await
            .unwrap();
        engine.reset_calls();

        let l1 = L1Inclusion {
            block_height: 222,
            block_hash: B256::repeat_byte(0x22),
        };
        update_l1_origin_for_blocks(&engine, 1, 1, 7, &l1).await.unwrap();

        let origin = engine.l1_origin(1).unwrap();
        assert_eq!(origin.l1_block_height, Some(222));
        assert_eq!(origin.build_payload_args_id, payload_id);
        assert_eq!(engine.head_l1_origin_id(), Some(1));
        assert_eq!(engine.last_block_id_by_batch_id(7).await.unwrap(), Some(1));
        let calls = engine.calls();
        assert_eq!((calls.update_l1_origin, calls.set_head_l1_origin), (1, 1));
    }

    #[tokio::test]
    async fn checkpoint_only_behind_block() {
        let protocol = StaticProtocolReader {
            last_verified: Some(VerifiedCheckpoint {
                block_id: 10,
                block_hash: B256::repeat_byte(1),
            }),
            ..Default::default()
        };
        assert!(verified_checkpoint(&protocol, 10).await.unwrap().is_none());
        assert_eq!(
            verified_checkpoint(&protocol, 11).await.unwrap(),
            protocol.last_verified
        );
    }
}

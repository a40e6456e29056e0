//! In-memory collaborators, used by the inserter tests.
use alloy_consensus::{
    constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH},
    Header, TxEnvelope,
};
use alloy_primitives::{keccak256, Address, FixedBytes, B256, U256};
use alloy_rlp::Decodable;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};
use taiko_driver_lib::{
    input::{pacaya::BaseFeeConfig, shasta::BlockState},
    utils::payload::{BuildPayloadArgs, PayloadId},
};

use crate::{
    interfaces::{DriverError, DriverResult},
    provider::{
        BlockHeader, ExecutableData, ExecutionEngine, ForkchoiceState, ForkchoiceUpdated,
        L1DataSource, L1Origin, PayloadAttributes, PayloadStatus, PayloadStatusKind,
        ProtocolStateReader, VerifiedCheckpoint,
    },
};

/// How often each engine method was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCalls {
    pub forkchoice_updated: usize,
    pub get_payload: usize,
    pub new_payload: usize,
    pub update_l1_origin: usize,
    pub set_head_l1_origin: usize,
    pub set_batch_to_last_block: usize,
}

#[derive(Debug, Clone)]
struct PendingBlock {
    l1_origin: L1Origin,
    batch_id: Option<u64>,
}

#[derive(Debug, Default)]
struct EngineState {
    headers: HashMap<B256, BlockHeader>,
    transactions: HashMap<B256, Vec<B256>>,
    canonical: BTreeMap<u64, B256>,
    payloads: HashMap<PayloadId, (ExecutableData, PendingBlock)>,
    built: HashMap<B256, PendingBlock>,
    l1_origins: BTreeMap<u64, L1Origin>,
    head_l1_origin: Option<u64>,
    batch_to_block: HashMap<u64, u64>,
    new_payload_status: Option<PayloadStatusKind>,
    calls: EngineCalls,
}

/// A single-chain execution engine that honours the engine API contract.
///
/// Payload ids are derived like the real engine does, and the golden touch
/// nonce at a block is its number, one anchor per block.
#[derive(Debug, Default)]
pub struct MemEngine {
    state: Mutex<EngineState>,
}

impl MemEngine {
    pub fn new(genesis: Header) -> Self {
        let engine = Self::default();
        engine.insert_canonical(BlockHeader::seal(genesis));
        engine
    }

    pub fn with_genesis(gas_limit: u64, timestamp: u64) -> Self {
        Self::new(Header {
            gas_limit,
            timestamp,
            base_fee_per_gas: Some(10_000_000),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> EngineCalls {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = EngineCalls::default();
    }

    /// Makes every following `new_payload` answer with `status`.
    pub fn set_new_payload_status(&self, status: PayloadStatusKind) {
        self.lock().new_payload_status = Some(status);
    }

    pub fn insert_canonical(&self, header: BlockHeader) {
        let mut state = self.lock();
        state.canonical.insert(header.number(), header.hash);
        state.headers.insert(header.hash, header);
    }

    pub fn insert_l1_origin(&self, origin: L1Origin) {
        self.lock().l1_origins.insert(origin.block_id, origin);
    }

    pub fn l1_origin(&self, block_id: u64) -> Option<L1Origin> {
        self.lock().l1_origins.get(&block_id).cloned()
    }

    pub fn head_l1_origin_id(&self) -> Option<u64> {
        self.lock().head_l1_origin
    }

    /// Replaces the transactions recorded for the canonical block `number`.
    pub fn set_transaction_hashes(&self, number: u64, hashes: Vec<B256>) {
        let mut state = self.lock();
        if let Some(hash) = state.canonical.get(&number).copied() {
            state.transactions.insert(hash, hashes);
        }
    }

    pub fn head_number(&self) -> u64 {
        self.lock()
            .canonical
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn header_from_payload(payload: &ExecutableData, tx_list_hash: B256) -> Header {
    Header {
        parent_hash: payload.parent_hash,
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        beneficiary: payload.fee_recipient,
        state_root: payload.state_root,
        transactions_root: tx_list_hash,
        receipts_root: payload.receipts_root,
        difficulty: U256::ZERO,
        number: payload.block_number,
        gas_limit: payload.gas_limit,
        gas_used: payload.gas_used,
        timestamp: payload.timestamp,
        extra_data: payload.extra_data.clone(),
        mix_hash: payload.prev_randao,
        base_fee_per_gas: Some(u64::try_from(payload.base_fee_per_gas).unwrap_or(u64::MAX)),
        withdrawals_root: Some(EMPTY_ROOT_HASH),
        ..Default::default()
    }
}

impl ExecutionEngine for MemEngine {
    async fn forkchoice_updated(
        &self,
        fc: ForkchoiceState,
        attributes: Option<PayloadAttributes>,
    ) -> DriverResult<ForkchoiceUpdated> {
        let mut state = self.lock();
        state.calls.forkchoice_updated += 1;

        let Some(parent) = state.headers.get(&fc.head_block_hash).cloned() else {
            return Ok(ForkchoiceUpdated {
                payload_status: PayloadStatus {
                    status: PayloadStatusKind::Syncing,
                    latest_valid_hash: None,
                    validation_error: None,
                },
                payload_id: None,
            });
        };

        let Some(attributes) = attributes else {
            // Reorg the canonical chain onto the new head.
            let mut cursor = Some(parent.clone());
            state.canonical.retain(|number, _| *number <= parent.number());
            while let Some(header) = cursor {
                if state.canonical.get(&header.number()) == Some(&header.hash)
                    && header.number() != parent.number()
                {
                    break;
                }
                state.canonical.insert(header.number(), header.hash);
                cursor = match header.number() {
                    0 => None,
                    _ => state.headers.get(&header.inner.parent_hash).cloned(),
                };
            }
            return Ok(ForkchoiceUpdated {
                payload_status: PayloadStatus::valid(parent.hash),
                payload_id: None,
            });
        };

        let metadata = &attributes.block_metadata;
        let tx_list_hash = keccak256(&metadata.tx_list);
        let id = BuildPayloadArgs {
            parent: parent.hash,
            timestamp: attributes.timestamp,
            fee_recipient: attributes.suggested_fee_recipient,
            random: attributes.prev_randao,
            tx_list_hash,
        }
        .id();

        let mut payload = ExecutableData {
            parent_hash: parent.hash,
            fee_recipient: metadata.beneficiary,
            state_root: keccak256(
                [parent.inner.state_root.as_slice(), tx_list_hash.as_slice()].concat(),
            ),
            prev_randao: metadata.mix_hash,
            block_number: parent.number() + 1,
            gas_limit: metadata.gas_limit,
            timestamp: metadata.timestamp,
            extra_data: metadata.extra_data.clone(),
            base_fee_per_gas: attributes.base_fee_per_gas,
            transactions: vec![metadata.tx_list.clone()],
            ..Default::default()
        };
        payload.block_hash = header_from_payload(&payload, tx_list_hash).hash_slow();

        let mut l1_origin = attributes.l1_origin.clone();
        l1_origin.build_payload_args_id = FixedBytes::from(id);
        let pending = PendingBlock {
            l1_origin,
            batch_id: metadata.batch_id,
        };
        state.payloads.insert(id, (payload, pending));

        Ok(ForkchoiceUpdated {
            payload_status: PayloadStatus::valid(parent.hash),
            payload_id: Some(FixedBytes::from(id)),
        })
    }

    async fn get_payload(&self, payload_id: PayloadId) -> DriverResult<ExecutableData> {
        let mut state = self.lock();
        state.calls.get_payload += 1;
        let (payload, pending) = state
            .payloads
            .get(&payload_id)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(format!("payload {payload_id:?}")))?;
        state.built.insert(payload.block_hash, pending);
        Ok(payload)
    }

    async fn new_payload(&self, payload: &ExecutableData) -> DriverResult<PayloadStatus> {
        let mut state = self.lock();
        state.calls.new_payload += 1;
        if let Some(status) = state.new_payload_status {
            return Ok(PayloadStatus {
                status,
                latest_valid_hash: None,
                validation_error: Some("rejected".to_owned()),
            });
        }
        if !state.headers.contains_key(&payload.parent_hash) {
            return Ok(PayloadStatus {
                status: PayloadStatusKind::Syncing,
                latest_valid_hash: None,
                validation_error: None,
            });
        }
        let tx_list_hash = payload
            .transactions
            .first()
            .map(keccak256)
            .unwrap_or_default();
        let header = BlockHeader::seal(header_from_payload(payload, tx_list_hash));
        if header.hash != payload.block_hash {
            return Ok(PayloadStatus {
                status: PayloadStatusKind::InvalidBlockHash,
                latest_valid_hash: None,
                validation_error: None,
            });
        }
        if let Some(PendingBlock {
            mut l1_origin,
            batch_id,
        }) = state.built.remove(&header.hash)
        {
            l1_origin.l2_block_hash = header.hash;
            if !l1_origin.is_preconf_block() {
                state.head_l1_origin = Some(l1_origin.block_id);
            }
            if let Some(batch_id) = batch_id {
                state.batch_to_block.insert(batch_id, header.number());
            }
            state.l1_origins.insert(l1_origin.block_id, l1_origin);
        }
        let tx_hashes = payload
            .transactions
            .first()
            .and_then(|tx_list| Vec::<TxEnvelope>::decode(&mut tx_list.as_ref()).ok())
            .unwrap_or_default()
            .iter()
            .map(|tx| *tx.tx_hash())
            .collect();
        state.transactions.insert(header.hash, tx_hashes);
        state.headers.insert(header.hash, header.clone());
        Ok(PayloadStatus::valid(header.hash))
    }

    async fn header_by_hash(&self, hash: B256) -> DriverResult<Option<BlockHeader>> {
        Ok(self.lock().headers.get(&hash).cloned())
    }

    async fn header_by_number(&self, number: u64) -> DriverResult<Option<BlockHeader>> {
        let state = self.lock();
        Ok(state
            .canonical
            .get(&number)
            .and_then(|hash| state.headers.get(hash))
            .cloned())
    }

    async fn transaction_hashes_by_number(&self, number: u64) -> DriverResult<Option<Vec<B256>>> {
        let state = self.lock();
        Ok(state
            .canonical
            .get(&number)
            .map(|hash| state.transactions.get(hash).cloned().unwrap_or_default()))
    }

    async fn head_header(&self) -> DriverResult<BlockHeader> {
        let state = self.lock();
        state
            .canonical
            .values()
            .next_back()
            .and_then(|hash| state.headers.get(hash))
            .cloned()
            .ok_or_else(|| DriverError::NotFound("head".to_owned()))
    }

    async fn l1_origin_by_id(&self, block_id: u64) -> DriverResult<Option<L1Origin>> {
        Ok(self.l1_origin(block_id))
    }

    async fn head_l1_origin(&self) -> DriverResult<Option<L1Origin>> {
        let state = self.lock();
        Ok(state
            .head_l1_origin
            .and_then(|id| state.l1_origins.get(&id))
            .cloned())
    }

    async fn update_l1_origin(&self, origin: &L1Origin) -> DriverResult<()> {
        let mut state = self.lock();
        state.calls.update_l1_origin += 1;
        state.l1_origins.insert(origin.block_id, origin.clone());
        Ok(())
    }

    async fn set_head_l1_origin(&self, block_id: u64) -> DriverResult<()> {
        let mut state = self.lock();
        state.calls.set_head_l1_origin += 1;
        state.head_l1_origin = Some(block_id);
        Ok(())
    }

    async fn set_batch_to_last_block(&self, batch_id: u64, block_id: u64) -> DriverResult<()> {
        let mut state = self.lock();
        state.calls.set_batch_to_last_block += 1;
        state.batch_to_block.insert(batch_id, block_id);
        Ok(())
    }

    async fn last_block_id_by_batch_id(&self, batch_id: u64) -> DriverResult<Option<u64>> {
        Ok(self.lock().batch_to_block.get(&batch_id).copied())
    }

    async fn account_nonce_at(&self, _address: Address, block_hash: B256) -> DriverResult<u64> {
        self.lock()
            .headers
            .get(&block_hash)
            .map(BlockHeader::number)
            .ok_or_else(|| DriverError::NotFound(format!("state of block {block_hash}")))
    }
}

/// L1 headers by number and blob data by first blob hash.
#[derive(Debug, Default)]
pub struct MemL1Source {
    headers: Mutex<BTreeMap<u64, BlockHeader>>,
    blobs: Mutex<HashMap<B256, DriverResult<Vec<u8>>>>,
}

impl MemL1Source {
    /// A chain of `len` empty L1 headers with distinct state roots.
    pub fn with_chain(len: u64) -> Self {
        let source = Self::default();
        let mut parent_hash = B256::ZERO;
        for number in 0..len {
            let header = BlockHeader::seal(Header {
                parent_hash,
                number,
                state_root: keccak256(number.to_be_bytes()),
                timestamp: number * 12,
                ..Default::default()
            });
            parent_hash = header.hash;
            source.insert_header(header);
        }
        source
    }

    pub fn insert_header(&self, header: BlockHeader) {
        if let Ok(mut headers) = self.headers.lock() {
            headers.insert(header.number(), header);
        }
    }

    pub fn header(&self, number: u64) -> Option<BlockHeader> {
        self.headers.lock().ok()?.get(&number).cloned()
    }

    /// Serves `data` for requests whose first blob hash is `hash`.
    pub fn insert_blob_data(&self, hash: B256, data: DriverResult<Vec<u8>>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(hash, data);
        }
    }
}

impl L1DataSource for MemL1Source {
    async fn header_by_hash(&self, hash: B256) -> DriverResult<BlockHeader> {
        self.headers
            .lock()
            .ok()
            .and_then(|headers| headers.values().find(|h| h.hash == hash).cloned())
            .ok_or_else(|| DriverError::NotFound(format!("L1 block {hash}")))
    }

    async fn header_by_number(&self, number: u64) -> DriverResult<BlockHeader> {
        self.header(number)
            .ok_or_else(|| DriverError::NotFound(format!("L1 block {number}")))
    }

    async fn blob_bytes(&self, _timestamp: u64, blob_hashes: &[B256]) -> DriverResult<Vec<u8>> {
        let first = blob_hashes
            .first()
            .ok_or_else(|| DriverError::InvalidBlob("no blob hashes".to_owned()))?;
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| DriverError::BlobUnavailable("poisoned".to_owned()))?;
        match blobs.get(first) {
            Some(Ok(data)) => Ok(data.clone()),
            Some(Err(DriverError::InvalidBlob(e))) => Err(DriverError::InvalidBlob(e.clone())),
            Some(Err(e)) => Err(DriverError::BlobUnavailable(e.to_string())),
            None => Err(DriverError::BlobUnavailable(format!("blob {first}"))),
        }
    }
}

/// Fixed protocol state.
#[derive(Debug, Clone, Default)]
pub struct StaticProtocolReader {
    pub base_fee: u128,
    pub anchor_block_number: u64,
    pub last_verified: Option<VerifiedCheckpoint>,
    pub batch_last_block_ids: HashMap<u64, u64>,
    pub last_pacaya_block_id: u64,
}

impl ProtocolStateReader for StaticProtocolReader {
    async fn base_fee_v2(
        &self,
        _parent: &BlockHeader,
        _timestamp: u64,
        _config: &BaseFeeConfig,
    ) -> DriverResult<u128> {
        Ok(self.base_fee)
    }

    async fn shasta_block_state(&self, _parent_hash: B256) -> DriverResult<BlockState> {
        Ok(BlockState {
            anchorBlockNumber: alloy_primitives::aliases::U48::from(self.anchor_block_number),
            ancestorsHash: B256::ZERO,
        })
    }

    async fn last_verified_block(&self) -> DriverResult<Option<VerifiedCheckpoint>> {
        Ok(self.last_verified)
    }

    async fn batch_last_block_id(&self, batch_id: u64) -> DriverResult<u64> {
        self.batch_last_block_ids
            .get(&batch_id)
            .copied()
            .ok_or_else(|| DriverError::NotFound(format!("batch {batch_id}")))
    }

    async fn last_pacaya_block_id(&self) -> DriverResult<u64> {
        Ok(self.last_pacaya_block_id)
    }
}

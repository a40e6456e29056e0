use alloy_consensus::Header;
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Address, Bloom, Bytes, FixedBytes, B256, U256};
use serde::{Deserialize, Serialize};
use taiko_driver_lib::{
    input::{pacaya::BaseFeeConfig, shasta::BlockState},
    utils::payload::PayloadId,
};

use crate::interfaces::DriverResult;

pub mod blob;
pub mod mem;
pub mod rpc;

/// A header together with its hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: B256,
    #[serde(flatten)]
    pub inner: Header,
}

impl BlockHeader {
    pub fn seal(inner: Header) -> Self {
        Self {
            hash: inner.hash_slow(),
            inner,
        }
    }

    pub fn number(&self) -> u64 {
        self.inner.number
    }

    pub fn base_fee(&self) -> u64 {
        self.inner.base_fee_per_gas.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceState {
    pub head_block_hash: B256,
    pub safe_block_hash: B256,
    pub finalized_block_hash: B256,
}

/// Taiko specific block fields carried in the payload attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadata {
    pub beneficiary: Address,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    /// RLP list of the anchor followed by the block's transactions.
    pub tx_list: Bytes,
    pub mix_hash: B256,
    pub extra_data: Bytes,
    #[serde(
        rename = "batchID",
        default,
        skip_serializing_if = "Option::is_none",
        with = "alloy_serde::quantity::opt"
    )]
    pub batch_id: Option<u64>,
}

/// Persisted link from an L2 block to the L1 data it was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Origin {
    #[serde(rename = "blockID", with = "alloy_serde::quantity")]
    pub block_id: u64,
    #[serde(rename = "l2BlockHash")]
    pub l2_block_hash: B256,
    /// Unset for preconfirmed blocks.
    #[serde(
        rename = "l1BlockHeight",
        default,
        with = "alloy_serde::quantity::opt"
    )]
    pub l1_block_height: Option<u64>,
    #[serde(rename = "l1BlockHash")]
    pub l1_block_hash: B256,
    #[serde(rename = "buildPayloadArgsID", default)]
    pub build_payload_args_id: FixedBytes<8>,
    #[serde(rename = "isForcedInclusion", default)]
    pub is_forced_inclusion: bool,
    #[serde(default)]
    pub signature: FixedBytes<65>,
}

impl L1Origin {
    pub fn is_preconf_block(&self) -> bool {
        self.l1_block_height.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributes {
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    pub prev_randao: B256,
    pub suggested_fee_recipient: Address,
    pub withdrawals: Vec<Withdrawal>,
    pub block_metadata: BlockMetadata,
    pub base_fee_per_gas: U256,
    pub l1_origin: L1Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadStatusKind {
    Valid,
    Invalid,
    Syncing,
    Accepted,
    InvalidBlockHash,
}

impl std::fmt::Display for PayloadStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            PayloadStatusKind::Valid => "VALID",
            PayloadStatusKind::Invalid => "INVALID",
            PayloadStatusKind::Syncing => "SYNCING",
            PayloadStatusKind::Accepted => "ACCEPTED",
            PayloadStatusKind::InvalidBlockHash => "INVALID_BLOCK_HASH",
        };
        f.write_str(status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatus {
    pub status: PayloadStatusKind,
    #[serde(default)]
    pub latest_valid_hash: Option<B256>,
    #[serde(default)]
    pub validation_error: Option<String>,
}

impl PayloadStatus {
    pub fn valid(latest_valid_hash: B256) -> Self {
        Self {
            status: PayloadStatusKind::Valid,
            latest_valid_hash: Some(latest_valid_hash),
            validation_error: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == PayloadStatusKind::Valid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceUpdated {
    pub payload_status: PayloadStatus,
    #[serde(default)]
    pub payload_id: Option<FixedBytes<8>>,
}

/// An execution payload as built by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableData {
    pub parent_hash: B256,
    pub fee_recipient: Address,
    pub state_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub prev_randao: B256,
    #[serde(with = "alloy_serde::quantity")]
    pub block_number: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub base_fee_per_gas: U256,
    pub block_hash: B256,
    pub transactions: Vec<Bytes>,
    #[serde(default)]
    pub withdrawals: Vec<Withdrawal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals_hash: Option<B256>,
}

/// The safe and finalized block used for every fork choice update of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifiedCheckpoint {
    pub block_id: u64,
    pub block_hash: B256,
}

/// The L2 execution engine, through the engine API and taiko's extensions.
#[allow(async_fn_in_trait)]
pub trait ExecutionEngine {
    async fn forkchoice_updated(
        &self,
        state: ForkchoiceState,
        attributes: Option<PayloadAttributes>,
    ) -> DriverResult<ForkchoiceUpdated>;

    async fn get_payload(&self, payload_id: PayloadId) -> DriverResult<ExecutableData>;

    async fn new_payload(&self, payload: &ExecutableData) -> DriverResult<PayloadStatus>;

    async fn header_by_hash(&self, hash: B256) -> DriverResult<Option<BlockHeader>>;

    async fn header_by_number(&self, number: u64) -> DriverResult<Option<BlockHeader>>;

    async fn head_header(&self) -> DriverResult<BlockHeader>;

    /// Hashes of the transactions of the canonical block `number`, in block order.
    async fn transaction_hashes_by_number(&self, number: u64) -> DriverResult<Option<Vec<B256>>>;

    async fn l1_origin_by_id(&self, block_id: u64) -> DriverResult<Option<L1Origin>>;

    async fn head_l1_origin(&self) -> DriverResult<Option<L1Origin>>;

    async fn update_l1_origin(&self, origin: &L1Origin) -> DriverResult<()>;

    async fn set_head_l1_origin(&self, block_id: u64) -> DriverResult<()>;

    async fn set_batch_to_last_block(&self, batch_id: u64, block_id: u64) -> DriverResult<()>;

    async fn last_block_id_by_batch_id(&self, batch_id: u64) -> DriverResult<Option<u64>>;

    /// Nonce of `address` in the state of block `block_hash`.
    async fn account_nonce_at(&self, address: Address, block_hash: B256) -> DriverResult<u64>;
}

/// Headers and blobs from L1.
#[allow(async_fn_in_trait)]
pub trait L1DataSource {
    async fn header_by_hash(&self, hash: B256) -> DriverResult<BlockHeader>;

    async fn header_by_number(&self, number: u64) -> DriverResult<BlockHeader>;

    /// Decoded data of the given blobs, concatenated in order.
    ///
    /// Fails with `BlobUnavailable` when the blobs cannot be fetched and with
    /// `InvalidBlob` when they can but do not decode.
    async fn blob_bytes(&self, timestamp: u64, blob_hashes: &[B256]) -> DriverResult<Vec<u8>>;
}

/// Read-only calls into the protocol contracts.
#[allow(async_fn_in_trait)]
pub trait ProtocolStateReader {
    /// Base fee from the L2 anchor contract, evaluated at `parent`.
    async fn base_fee_v2(
        &self,
        parent: &BlockHeader,
        timestamp: u64,
        config: &BaseFeeConfig,
    ) -> DriverResult<u128>;

    /// Shasta anchor state after `parent_hash`.
    async fn shasta_block_state(&self, parent_hash: B256) -> DriverResult<BlockState>;

    /// The last verified Pacaya block, if any.
    async fn last_verified_block(&self) -> DriverResult<Option<VerifiedCheckpoint>>;

    async fn batch_last_block_id(&self, batch_id: u64) -> DriverResult<u64>;

    async fn last_pacaya_block_id(&self) -> DriverResult<u64>;
}

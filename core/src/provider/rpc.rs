use alloy_primitives::{Address, Bytes, FixedBytes, B256, U64};
use alloy_rpc_client::{ClientBuilder, RpcClient};
use alloy_rpc_types::BlockNumberOrTag;
use alloy_sol_types::SolCall;
use alloy_transport_http::Http;
use reqwest_alloy::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Debug;
use taiko_driver_lib::{
    consts::ProtocolSpec,
    input::{
        pacaya::{
            getBasefeeV2Call, getBatchCall, getLastVerifiedTransitionCall, getStats2Call,
            BaseFeeConfig,
        },
        shasta::{getBlockStateCall, BlockState},
    },
    utils::payload::PayloadId,
};
use tracing::{debug, trace};

use crate::{
    interfaces::{DriverError, DriverResult},
    provider::{
        blob::BeaconBlobSource, BlockHeader, ExecutableData, ExecutionEngine, ForkchoiceState,
        ForkchoiceUpdated, L1DataSource, L1Origin, PayloadAttributes, PayloadStatus,
        ProtocolStateReader, VerifiedCheckpoint,
    },
};

type HttpClient = RpcClient<Http<Client>>;

fn connect(url: &str) -> DriverResult<HttpClient> {
    let url = reqwest_alloy::Url::parse(url)
        .map_err(|_| DriverError::RPC(format!("Invalid RPC URL {url}")))?;
    debug!("provider rpc url: {url}");
    Ok(ClientBuilder::default().http(url))
}

async fn call<P, R>(client: &HttpClient, method: &'static str, params: P) -> DriverResult<R>
where
    P: Serialize + Clone + Debug + Send + Sync + Unpin,
    R: DeserializeOwned + Debug + Send + Sync + Unpin + 'static,
{
    trace!("{method}({params:?})");
    client
        .request(method, params)
        .await
        .map_err(|e| DriverError::RPC(format!("{method} failed: {e}")))
}

/// Like [call], but a "not found" error or a null result is `None`.
async fn call_opt<P, R>(
    client: &HttpClient,
    method: &'static str,
    params: P,
) -> DriverResult<Option<R>>
where
    P: Serialize + Clone + Debug + Send + Sync + Unpin,
    R: DeserializeOwned + Debug + Send + Sync + Unpin + 'static,
{
    match client.request::<P, Option<R>>(method, params).await {
        Ok(result) => Ok(result),
        Err(e) if is_not_found(&e.to_string()) => Ok(None),
        Err(e) => Err(DriverError::RPC(format!("{method} failed: {e}"))),
    }
}

fn is_not_found(message: &str) -> bool {
    message.to_lowercase().contains("not found")
}

/// L2 execution engine over JSON-RPC: `eth_`/`taiko_` on the public
/// endpoint, `engine_`/`taikoAuth_` on the authenticated one.
#[derive(Clone)]
pub struct RpcExecutionEngine {
    pub client: HttpClient,
    pub engine: HttpClient,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionPayloadEnvelope {
    execution_payload: ExecutableData,
}

/// Transaction hashes of a block fetched without full transaction bodies.
#[derive(Debug, Clone, Deserialize)]
struct BlockTransactionHashes {
    transactions: Vec<B256>,
}

impl RpcExecutionEngine {
    pub fn new(l2_rpc: &str, l2_engine: &str) -> DriverResult<Self> {
        Ok(Self {
            client: connect(l2_rpc)?,
            engine: connect(l2_engine)?,
        })
    }
}

impl ExecutionEngine for RpcExecutionEngine {
    async fn forkchoice_updated(
        &self,
        state: ForkchoiceState,
        attributes: Option<PayloadAttributes>,
    ) -> DriverResult<ForkchoiceUpdated> {
        call(
            &self.engine,
            "engine_forkchoiceUpdatedV2",
            (state, attributes),
        )
        .await
    }

    async fn get_payload(&self, payload_id: PayloadId) -> DriverResult<ExecutableData> {
        let envelope: ExecutionPayloadEnvelope = call(
            &self.engine,
            "engine_getPayloadV2",
            (FixedBytes::<8>::from(payload_id),),
        )
        .await?;
        Ok(envelope.execution_payload)
    }

    async fn new_payload(&self, payload: &ExecutableData) -> DriverResult<PayloadStatus> {
        call(&self.engine, "engine_newPayloadV2", (payload.clone(),)).await
    }

    async fn header_by_hash(&self, hash: B256) -> DriverResult<Option<BlockHeader>> {
        call_opt(&self.client, "eth_getBlockByHash", (hash, false)).await
    }

    async fn header_by_number(&self, number: u64) -> DriverResult<Option<BlockHeader>> {
        call_opt(
            &self.client,
            "eth_getBlockByNumber",
            (BlockNumberOrTag::from(number), false),
        )
        .await
    }

    async fn transaction_hashes_by_number(&self, number: u64) -> DriverResult<Option<Vec<B256>>> {
        let block: Option<BlockTransactionHashes> = call_opt(
            &self.client,
            "eth_getBlockByNumber",
            (BlockNumberOrTag::from(number), false),
        )
        .await?;
        Ok(block.map(|block| block.transactions))
    }

    async fn head_header(&self) -> DriverResult<BlockHeader> {
        call_opt(
            &self.client,
            "eth_getBlockByNumber",
            (BlockNumberOrTag::Latest, false),
        )
        .await?
        .ok_or_else(|| DriverError::NotFound("latest L2 block".to_owned()))
    }

    async fn l1_origin_by_id(&self, block_id: u64) -> DriverResult<Option<L1Origin>> {
        call_opt(&self.client, "taiko_l1OriginByID", (U64::from(block_id),)).await
    }

    async fn head_l1_origin(&self) -> DriverResult<Option<L1Origin>> {
        call_opt(&self.client, "taiko_headL1Origin", json!([])).await
    }

    async fn update_l1_origin(&self, origin: &L1Origin) -> DriverResult<()> {
        call::<_, Value>(&self.engine, "taikoAuth_updateL1Origin", (origin.clone(),)).await?;
        Ok(())
    }

    async fn set_head_l1_origin(&self, block_id: u64) -> DriverResult<()> {
        call::<_, Value>(
            &self.engine,
            "taikoAuth_setHeadL1Origin",
            (U64::from(block_id),),
        )
        .await?;
        Ok(())
    }

    async fn set_batch_to_last_block(&self, batch_id: u64, block_id: u64) -> DriverResult<()> {
        call::<_, Value>(
            &self.engine,
            "taikoAuth_setBatchToLastBlock",
            (U64::from(batch_id), U64::from(block_id)),
        )
        .await?;
        Ok(())
    }

    async fn last_block_id_by_batch_id(&self, batch_id: u64) -> DriverResult<Option<u64>> {
        let block_id: Option<U64> = call_opt(
            &self.engine,
            "taikoAuth_lastBlockIDByBatchID",
            (U64::from(batch_id),),
        )
        .await?;
        Ok(block_id.map(|id| id.to::<u64>()))
    }

    async fn account_nonce_at(&self, address: Address, block_hash: B256) -> DriverResult<u64> {
        let nonce: Option<U64> = call_opt(
            &self.client,
            "eth_getTransactionCount",
            (address, json!({ "blockHash": block_hash })),
        )
        .await?;
        Ok(nonce.map(|n| n.to::<u64>()).unwrap_or_default())
    }
}

/// L1 headers over JSON-RPC, blobs from the beacon node.
#[derive(Clone)]
pub struct RpcL1Source {
    pub client: HttpClient,
    pub blobs: BeaconBlobSource,
}

impl RpcL1Source {
    pub fn new(l1_rpc: &str, l1_beacon_rpc: &str, spec: &ProtocolSpec) -> DriverResult<Self> {
        Ok(Self {
            client: connect(l1_rpc)?,
            blobs: BeaconBlobSource::new(l1_beacon_rpc, spec),
        })
    }
}

impl L1DataSource for RpcL1Source {
    async fn header_by_hash(&self, hash: B256) -> DriverResult<BlockHeader> {
        call_opt(&self.client, "eth_getBlockByHash", (hash, false))
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("L1 block {hash}")))
    }

    async fn header_by_number(&self, number: u64) -> DriverResult<BlockHeader> {
        call_opt(
            &self.client,
            "eth_getBlockByNumber",
            (BlockNumberOrTag::from(number), false),
        )
        .await?
        .ok_or_else(|| DriverError::NotFound(format!("L1 block {number}")))
    }

    async fn blob_bytes(&self, timestamp: u64, blob_hashes: &[B256]) -> DriverResult<Vec<u8>> {
        self.blobs.get_blob_bytes(timestamp, blob_hashes).await
    }
}

/// `eth_call`s into the L1 inbox and the L2 anchor contract.
#[derive(Clone)]
pub struct RpcProtocolReader {
    pub l1: HttpClient,
    pub l2: HttpClient,
    pub inbox_address: Address,
    pub anchor_address: Address,
}

impl RpcProtocolReader {
    pub fn new(l1_rpc: &str, l2_rpc: &str, spec: &ProtocolSpec) -> DriverResult<Self> {
        Ok(Self {
            l1: connect(l1_rpc)?,
            l2: connect(l2_rpc)?,
            inbox_address: spec.inbox_address,
            anchor_address: spec.anchor_address,
        })
    }

    async fn eth_call<C: SolCall>(
        client: &HttpClient,
        to: Address,
        input: &C,
        block: Value,
    ) -> DriverResult<C::Return> {
        let data: Bytes = call(
            client,
            "eth_call",
            (json!({ "to": to, "data": Bytes::from(input.abi_encode()) }), block),
        )
        .await?;
        C::abi_decode_returns(&data, true)
            .map_err(|e| DriverError::RPC(format!("invalid {} return data: {e}", C::SIGNATURE)))
    }
}

impl ProtocolStateReader for RpcProtocolReader {
    async fn base_fee_v2(
        &self,
        parent: &BlockHeader,
        timestamp: u64,
        config: &BaseFeeConfig,
    ) -> DriverResult<u128> {
        let parent_gas_used = u32::try_from(parent.inner.gas_used).map_err(|_| {
            DriverError::RPC(format!("parent gas used {} overflows", parent.inner.gas_used))
        })?;
        let ret = Self::eth_call(
            &self.l2,
            self.anchor_address,
            &getBasefeeV2Call {
                _parentGasUsed: parent_gas_used,
                _blockTimestamp: timestamp,
                _baseFeeConfig: config.clone(),
            },
            json!({ "blockHash": parent.hash }),
        )
        .await?;
        u128::try_from(ret.basefee_)
            .map_err(|_| DriverError::RPC(format!("base fee {} overflows", ret.basefee_)))
    }

    async fn shasta_block_state(&self, parent_hash: B256) -> DriverResult<BlockState> {
        let ret = Self::eth_call(
            &self.l2,
            self.anchor_address,
            &getBlockStateCall {},
            json!({ "blockHash": parent_hash }),
        )
        .await?;
        Ok(ret._0)
    }

    async fn last_verified_block(&self) -> DriverResult<Option<VerifiedCheckpoint>> {
        if self.inbox_address == Address::ZERO {
            return Ok(None);
        }
        let ret = Self::eth_call(
            &self.l1,
            self.inbox_address,
            &getLastVerifiedTransitionCall {},
            json!("latest"),
        )
        .await?;
        Ok(Some(VerifiedCheckpoint {
            block_id: ret.blockId_,
            block_hash: ret.ts_.blockHash,
        }))
    }

    async fn batch_last_block_id(&self, batch_id: u64) -> DriverResult<u64> {
        let ret = Self::eth_call(
            &self.l1,
            self.inbox_address,
            &getBatchCall { _batchId: batch_id },
            json!("latest"),
        )
        .await?;
        Ok(ret.batch_.lastBlockId)
    }

    async fn last_pacaya_block_id(&self) -> DriverResult<u64> {
        let stats = Self::eth_call(
            &self.l1,
            self.inbox_address,
            &getStats2Call {},
            json!("latest"),
        )
        .await?
        ._0;
        match stats.numBatches.checked_sub(1) {
            Some(last_batch) => self.batch_last_block_id(last_batch).await,
            None => Ok(0),
        }
    }
}

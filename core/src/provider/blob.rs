use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use taiko_driver_lib::{consts::ProtocolSpec, utils::decode_blob_data};
use tracing::{debug, info, warn};

use crate::interfaces::{DriverError, DriverResult};

const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

/// Fetches blob sidecars from an L1 beacon node.
#[derive(Debug, Clone)]
pub struct BeaconBlobSource {
    client: reqwest::Client,
    beacon_rpc_url: String,
    genesis_time: u64,
    seconds_per_slot: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct BlobSidecar {
    pub index: String,
    pub blob: String,
    pub kzg_commitment: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct GetBlobsResponse {
    pub data: Vec<BlobSidecar>,
}

impl BeaconBlobSource {
    pub fn new(beacon_rpc_url: &str, spec: &ProtocolSpec) -> Self {
        Self {
            client: reqwest::Client::new(),
            beacon_rpc_url: beacon_rpc_url.trim_end_matches('/').to_owned(),
            genesis_time: spec.l1_genesis_time,
            seconds_per_slot: spec.l1_seconds_per_slot,
        }
    }

    /// Raw blobs matching `blob_hashes`, in the same order.
    pub async fn get_blobs(
        &self,
        timestamp: u64,
        blob_hashes: &[B256],
    ) -> DriverResult<Vec<Vec<u8>>> {
        let slot = block_time_to_block_slot(timestamp, self.genesis_time, self.seconds_per_slot)?;
        let url = format!("{}/eth/v1/beacon/blob_sidecars/{slot}", self.beacon_rpc_url);
        info!("Retrieve blobs from {url}.");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DriverError::BlobUnavailable(format!("request {url} failed: {e}")))?;
        if !response.status().is_success() {
            warn!(
                "Request {url} failed with status code: {}",
                response.status()
            );
            return Err(DriverError::BlobUnavailable(format!(
                "request {url} failed with status code: {}",
                response.status()
            )));
        }
        let sidecars: GetBlobsResponse = response
            .json()
            .await
            .map_err(|e| DriverError::BlobUnavailable(format!("invalid sidecar response: {e}")))?;
        if sidecars.data.is_empty() {
            return Err(DriverError::BlobUnavailable(format!(
                "blob data not available anymore for slot {slot}"
            )));
        }

        blob_hashes
            .iter()
            .map(|hash| {
                let sidecar = sidecars
                    .data
                    .iter()
                    .find(|sidecar| {
                        commitment_to_versioned_hash(&sidecar.kzg_commitment).as_ref() == Some(hash)
                    })
                    .ok_or_else(|| {
                        DriverError::InvalidBlob(format!("blob {hash} not found in slot {slot}"))
                    })?;
                debug!("found blob {hash} at index {}", sidecar.index);
                blob_to_bytes(&sidecar.blob)
            })
            .collect()
    }

    /// Decoded data of `blob_hashes`, concatenated.
    pub async fn get_blob_bytes(
        &self,
        timestamp: u64,
        blob_hashes: &[B256],
    ) -> DriverResult<Vec<u8>> {
        let blobs = self.get_blobs(timestamp, blob_hashes).await?;
        let mut data = Vec::new();
        for (blob, hash) in blobs.iter().zip(blob_hashes) {
            let decoded = decode_blob_data(blob)
                .map_err(|e| DriverError::InvalidBlob(format!("blob {hash}: {e}")))?;
            data.extend_from_slice(&decoded);
        }
        Ok(data)
    }
}

/// Slot of the given L1 timestamp.
pub fn block_time_to_block_slot(
    block_time: u64,
    genesis_time: u64,
    seconds_per_slot: u64,
) -> DriverResult<u64> {
    if genesis_time == 0 || seconds_per_slot == 0 {
        Err(DriverError::InvalidConfig(
            "genesis time is 0, please check chain spec".to_owned(),
        ))
    } else if block_time < genesis_time {
        Err(DriverError::BlobUnavailable(
            "provided block_time precedes genesis time".to_owned(),
        ))
    } else {
        Ok((block_time - genesis_time) / seconds_per_slot)
    }
}

/// `0x01 ‖ sha256(commitment)[1..]`
pub fn kzg_to_versioned_hash(commitment: &[u8]) -> B256 {
    let mut hash: [u8; 32] = Sha256::digest(commitment).into();
    hash[0] = VERSIONED_HASH_VERSION_KZG;
    B256::from(hash)
}

fn commitment_to_versioned_hash(commitment: &str) -> Option<B256> {
    hex::decode(commitment.trim_start_matches("0x"))
        .ok()
        .map(|bytes| kzg_to_versioned_hash(&bytes))
}

fn blob_to_bytes(blob: &str) -> DriverResult<Vec<u8>> {
    hex::decode(blob.to_lowercase().trim_start_matches("0x"))
        .map_err(|e| DriverError::InvalidBlob(format!("blob is not hex: {e}")))
}

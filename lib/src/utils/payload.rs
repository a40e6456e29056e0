use alloy_consensus::TxEnvelope;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use sha2::{Digest, Sha256};

use crate::consts::PAYLOAD_VERSION_V2;

/// Engine API payload identifier.
pub type PayloadId = [u8; 8];

/// The arguments the execution engine derives a payload id from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildPayloadArgs {
    pub parent: B256,
    pub timestamp: u64,
    pub fee_recipient: Address,
    pub random: B256,
    pub tx_list_hash: B256,
}

impl BuildPayloadArgs {
    /// sha256 over the fields with an empty withdrawals list, first byte replaced by the version.
    pub fn id(&self) -> PayloadId {
        let mut hasher = Sha256::new();
        hasher.update(self.parent);
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.random);
        hasher.update(self.fee_recipient);
        hasher.update([alloy_rlp::EMPTY_LIST_CODE]);
        hasher.update(self.tx_list_hash);
        let mut id = PayloadId::default();
        id.copy_from_slice(&hasher.finalize()[..8]);
        id[0] = PAYLOAD_VERSION_V2;
        id
    }
}

/// RLP list of the anchor transaction followed by the block's transactions.
pub fn encode_tx_list(anchor: &TxEnvelope, txs: &[TxEnvelope]) -> Bytes {
    let mut all = Vec::with_capacity(txs.len() + 1);
    all.push(anchor.clone());
    all.extend_from_slice(txs);
    Bytes::from(alloy_rlp::encode(&all))
}

pub fn tx_list_hash(tx_list: &[u8]) -> B256 {
    keccak256(tx_list)
}

/// `keccak256(abi.encode("TAIKO_DIFFICULTY", blockId))`
pub fn pacaya_difficulty(block_id: u64) -> B256 {
    keccak256(("TAIKO_DIFFICULTY".to_string(), U256::from(block_id)).abi_encode_params())
}

/// `keccak256(abi.encode(parentDifficulty, blockId))`
pub fn shasta_difficulty(parent_difficulty: U256, block_id: u64) -> B256 {
    keccak256((parent_difficulty, U256::from(block_id)).abi_encode_params())
}

// Layout follows LibManifest.sol in the protocol contracts.

use alloy_consensus::TxEnvelope;
use alloy_primitives::Address;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// One L2 block as described by a proposer.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct BlockManifest {
    /// The timestamp of the block
    pub timestamp: u64,
    /// The coinbase of the block
    pub coinbase: Address,
    /// The anchor block number. Zero means "reuse the anchor of the previous block".
    pub anchor_block_number: u64,
    /// The block's gas limit, excluding the anchor transaction's reservation
    pub gas_limit: u64,
    /// The transactions for this block
    pub transactions: Vec<TxEnvelope>,
}

/// Wire form of one derivation source's content.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct DerivationSourceManifest {
    pub blocks: Vec<BlockManifest>,
}

/// Decoded manifest handed to the inserter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalManifest {
    /// Blocks in this proposal
    pub blocks: Vec<BlockManifest>,
    /// Whether the proposer's data was unusable and the default was substituted
    pub default: bool,
}

impl Default for ProposalManifest {
    /// A single empty block whose metadata is inherited from the parent.
    fn default() -> Self {
        Self {
            blocks: vec![BlockManifest::default()],
            default: true,
        }
    }
}

impl From<DerivationSourceManifest> for ProposalManifest {
    fn from(source: DerivationSourceManifest) -> Self {
        Self {
            blocks: source.blocks,
            default: false,
        }
    }
}

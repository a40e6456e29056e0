// Copyright 2023 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Constants for the Taiko derivation protocol.
use core::fmt::Display;
use std::{collections::BTreeMap, str::FromStr};

use alloy_primitives::{address, Address, BlockNumber, ChainId};
use anyhow::{bail, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// The account allowed to sign anchor transactions.
pub const GOLDEN_TOUCH_ADDRESS: Address = address!("0000777735367b36bC9B61C50022d9D0700dB4Ec");

/// Private key of [GOLDEN_TOUCH_ADDRESS]. Public by protocol design.
pub const GOLDEN_TOUCH_PRIVATE_KEY: &str =
    "0x92954368afd3caa1f3ce3ead0069c1af414054aefe1ef9aeacc1bf426222ce38";

/// Gas reserved for the Ontake `anchorV2` transaction.
pub const ANCHOR_V2_GAS_LIMIT: u64 = 250_000;
/// Gas reserved for the Pacaya `anchorV3` and Shasta `anchorV4` transactions.
pub const ANCHOR_V3_V4_GAS_LIMIT: u64 = 1_000_000;

/// Engine API payload version used for payload id derivation.
pub const PAYLOAD_VERSION_V2: u8 = 2;

/// Number of field elements in one blob.
pub const BLOB_FIELD_ELEMENT_NUM: usize = 4096;
/// Bytes in one blob field element.
pub const BLOB_FIELD_ELEMENT_BYTES: usize = 32;
/// Raw size of one blob.
pub const BLOB_BYTES: usize = BLOB_FIELD_ELEMENT_NUM * BLOB_FIELD_ELEMENT_BYTES;
/// Largest compressed tx list accepted for Ontake and Pacaya.
pub const BLOCK_MAX_TX_LIST_BYTES: usize =
    (BLOB_FIELD_ELEMENT_BYTES - 1) * BLOB_FIELD_ELEMENT_NUM * 6;
/// Inflated data may be at most this many times its compressed size limit.
pub const MAX_DECOMPRESSION_FACTOR: usize = 10;

/// The only supported Shasta manifest payload version.
pub const SHASTA_PAYLOAD_VERSION: u64 = 1;
pub const PROPOSAL_MAX_BLOBS: usize = 10;
pub const PROPOSAL_MAX_BYTES: usize = BLOB_BYTES * PROPOSAL_MAX_BLOBS;
pub const PROPOSAL_MAX_BLOCKS: usize = 384;
pub const BLOCK_MAX_RAW_TRANSACTIONS: usize = 4096 * 2;

/// How far before the proposal timestamp a block timestamp may lag.
pub const TIMESTAMP_MAX_OFFSET: u64 = 12 * 32;
/// How far behind the origin block an anchor block may lag.
pub const ANCHOR_MAX_OFFSET: u64 = 128;

pub const MAX_BLOCK_GAS_LIMIT_CHANGE_PERMYRIAD: u64 = 10;
pub const GAS_LIMIT_CHANGE_DENOMINATOR: u64 = 10_000;
pub const MIN_BLOCK_GAS_LIMIT: u64 = 10_000_000;
pub const MAX_BLOCK_GAS_LIMIT: u64 = 100_000_000;

/// Largest bond type understood by the event decoder.
pub const MAX_BOND_TYPE: u8 = 2;

lazy_static! {
    /// The Taiko Alethia mainnet specification.
    pub static ref TAIKO_MAINNET_SPEC: ProtocolSpec = ProtocolSpec {
        name: Network::TaikoMainnet.to_string(),
        chain_id: 167000,
        forks: BTreeMap::from([
            (Fork::Ontake, ForkCondition::Block(538_304)),
            (Fork::Pacaya, ForkCondition::Block(1_166_000)),
            (Fork::Shasta, ForkCondition::TBD),
        ]),
        anchor_address: address!("1670000000000000000000000000000000010001"),
        inbox_address: address!("06a9Ab27c7e2255df1815E6CC0168d7755Feb19a"),
        l1_genesis_time: 1_606_824_023,
        l1_seconds_per_slot: 12,
    };

    /// The Taiko Hekla testnet specification.
    pub static ref TAIKO_HEKLA_SPEC: ProtocolSpec = ProtocolSpec {
        name: Network::TaikoHekla.to_string(),
        chain_id: 167009,
        forks: BTreeMap::from([
            (Fork::Ontake, ForkCondition::Block(840_512)),
            (Fork::Pacaya, ForkCondition::Block(1_299_888)),
            (Fork::Shasta, ForkCondition::TBD),
        ]),
        anchor_address: address!("1670090000000000000000000000000000010001"),
        inbox_address: address!("79C9109b764609df928d16fC4a91e9081F7e87DB"),
        l1_genesis_time: 1_695_902_400,
        l1_seconds_per_slot: 12,
    };

    /// Local devnet, every fork active from genesis.
    pub static ref TAIKO_DEVNET_SPEC: ProtocolSpec = ProtocolSpec {
        name: Network::TaikoDevnet.to_string(),
        chain_id: 167001,
        forks: BTreeMap::from([
            (Fork::Ontake, ForkCondition::Block(0)),
            (Fork::Pacaya, ForkCondition::Block(0)),
            (Fork::Shasta, ForkCondition::Timestamp(0)),
        ]),
        anchor_address: address!("1670010000000000000000000000000000010001"),
        inbox_address: Address::ZERO,
        l1_genesis_time: 0,
        l1_seconds_per_slot: 12,
    };
}

/// Protocol revisions, ordered by activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Fork {
    Ontake,
    Pacaya,
    Shasta,
}

impl Display for Fork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Fork::Ontake => "ontake",
            Fork::Pacaya => "pacaya",
            Fork::Shasta => "shasta",
        })
    }
}

/// The condition at which a fork is activated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ForkCondition {
    /// Activation at a given L2 block number.
    Block(BlockNumber),
    /// Activation at a given timestamp.
    Timestamp(u64),
    /// Not yet scheduled.
    #[default]
    TBD,
}

impl ForkCondition {
    /// Returns whether the condition has been met.
    pub fn active(&self, block_no: BlockNumber, timestamp: u64) -> bool {
        match self {
            ForkCondition::Block(block) => *block <= block_no,
            ForkCondition::Timestamp(ts) => *ts <= timestamp,
            ForkCondition::TBD => false,
        }
    }
}

/// Specification of a specific Taiko network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolSpec {
    pub name: String,
    pub chain_id: ChainId,
    pub forks: BTreeMap<Fork, ForkCondition>,
    pub anchor_address: Address,
    /// The L1 inbox contract, set per deployment on devnets.
    pub inbox_address: Address,
    pub l1_genesis_time: u64,
    pub l1_seconds_per_slot: u64,
}

impl ProtocolSpec {
    /// Returns the network chain ID.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Returns the latest fork active at the given block number and timestamp.
    pub fn active_fork(&self, block_no: BlockNumber, timestamp: u64) -> Result<Fork> {
        for (fork, condition) in self.forks.iter().rev() {
            if condition.active(block_no, timestamp) {
                return Ok(*fork);
            }
        }
        bail!("no supported fork for block {block_no}")
    }

    /// The first Pacaya block number, which is also the first Pacaya batch id.
    pub fn pacaya_fork_height(&self) -> Option<u64> {
        match self.forks.get(&Fork::Pacaya) {
            Some(ForkCondition::Block(block)) => Some(*block),
            _ => None,
        }
    }

    /// Shasta activation timestamp, zero when the fork is not scheduled.
    pub fn shasta_fork_timestamp(&self) -> u64 {
        match self.forks.get(&Fork::Shasta) {
            Some(ForkCondition::Timestamp(ts)) => *ts,
            _ => 0,
        }
    }

    pub fn network(&self) -> Option<Network> {
        Network::from_str(&self.name).ok()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Network {
    /// Taiko Alethia mainnet
    #[default]
    TaikoMainnet,
    /// Taiko Hekla testnet
    TaikoHekla,
    /// Local devnet
    TaikoDevnet,
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "taiko_mainnet" => Ok(Network::TaikoMainnet),
            "taiko_hekla" => Ok(Network::TaikoHekla),
            "taiko_devnet" => Ok(Network::TaikoDevnet),
            _ => bail!("Unknown network {s}"),
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Network::TaikoMainnet => "taiko_mainnet",
            Network::TaikoHekla => "taiko_hekla",
            Network::TaikoDevnet => "taiko_devnet",
        })
    }
}

impl Network {
    pub fn spec(&self) -> &'static ProtocolSpec {
        match self {
            Network::TaikoMainnet => &TAIKO_MAINNET_SPEC,
            Network::TaikoHekla => &TAIKO_HEKLA_SPEC,
            Network::TaikoDevnet => &TAIKO_DEVNET_SPEC,
        }
    }
}

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

use alloy_primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::consts::Fork;

pub mod ontake;
pub mod pacaya;
pub mod shasta;

pub use ontake::BlockMetadataV2;
pub use pacaya::{BatchInfo, BatchMetadata};
pub use shasta::ProposedEventPayload;

/// The L1 block an event was observed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct L1Inclusion {
    pub block_height: u64,
    pub block_hash: B256,
}

/// An Ontake `BlockProposedV2` event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OntakeProposal {
    pub meta: BlockMetadataV2,
    /// Tx list from the `CalldataTxList` event, empty when a blob was used.
    pub calldata_tx_list: Bytes,
    pub l1: L1Inclusion,
}

/// A Pacaya `BatchProposed` event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PacayaBatch {
    pub info: BatchInfo,
    pub meta: BatchMetadata,
    pub calldata_tx_list: Bytes,
    pub l1: L1Inclusion,
}

impl PacayaBatch {
    pub fn batch_id(&self) -> u64 {
        self.meta.batchId
    }

    /// Block id of the `index`-th block of this batch.
    pub fn block_id(&self, index: usize) -> u64 {
        let count = self.info.blocks.len() as u64;
        self.info.lastBlockId - (count - 1 - index as u64)
    }
}

/// A Shasta `Proposed` event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShastaProposal {
    pub payload: ProposedEventPayload,
    /// Set when the proposer lacked bond for this proposal.
    pub is_low_bond: bool,
    pub l1: L1Inclusion,
}

/// Fork-tagged proposal metadata delivered to the blocks inserter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum ProposalMetadata {
    Ontake(OntakeProposal),
    Pacaya(PacayaBatch),
    Shasta(ShastaProposal),
}

impl ProposalMetadata {
    pub fn fork(&self) -> Fork {
        match self {
            ProposalMetadata::Ontake(_) => Fork::Ontake,
            ProposalMetadata::Pacaya(_) => Fork::Pacaya,
            ProposalMetadata::Shasta(_) => Fork::Shasta,
        }
    }

    /// The proposal id: block id for Ontake, batch id for Pacaya, proposal id for Shasta.
    pub fn id(&self) -> u64 {
        match self {
            ProposalMetadata::Ontake(p) => p.meta.id,
            ProposalMetadata::Pacaya(b) => b.batch_id(),
            ProposalMetadata::Shasta(p) => p.payload.proposal_id(),
        }
    }

    pub fn l1(&self) -> &L1Inclusion {
        match self {
            ProposalMetadata::Ontake(p) => &p.l1,
            ProposalMetadata::Pacaya(b) => &b.l1,
            ProposalMetadata::Shasta(p) => &p.l1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::pacaya::BlockParams;

    #[test]
    fn pacaya_block_ids_end_at_last_block() {
        let batch = PacayaBatch {
            info: BatchInfo {
                blocks: vec![BlockParams::default(); 3],
                lastBlockId: 102,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            (0..3).map(|i| batch.block_id(i)).collect::<Vec<_>>(),
            vec![100, 101, 102]
        );
    }

    #[test]
    fn metadata_serde_roundtrip() {
        let metadata = ProposalMetadata::Shasta(ShastaProposal::default());
        let json = serde_json::to_string(&metadata).unwrap();
        let decoded: ProposalMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.fork(), Fork::Shasta);
        assert_eq!(decoded.id(), 0);
    }
}

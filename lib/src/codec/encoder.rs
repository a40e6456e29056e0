use alloy_primitives::{
    aliases::{U24, U48},
    Address, B256,
};

use super::{CodecError, CodecResult};
use crate::input::shasta::{
    BlobSlice, BondInstruction, ProposedEventPayload, ProvedEventPayload,
};

const BOND_INSTRUCTION_SIZE: usize = 6 + 1 + 20 + 20;

/// Exact size of the encoded `Proposed` payload.
pub fn encoded_proposed_event_size(payload: &ProposedEventPayload) -> usize {
    let sources: usize = payload
        .derivation
        .sources
        .iter()
        .map(|source| 1 + 2 + 32 * source.blobSlice.blobHashes.len() + 3 + 6)
        .sum();
    // proposal header + derivation header + sources + hashes + core state + bonds
    (6 + 20 + 6 + 6)
        + (6 + 32 + 1)
        + 2
        + sources
        + (32 + 32)
        + (6 * 4 + 32 + 32)
        + 2
        + BOND_INSTRUCTION_SIZE * payload.bondInstructions.len()
}

/// Exact size of the encoded `Proved` payload.
pub fn encoded_proved_event_size(payload: &ProvedEventPayload) -> usize {
    6 + (32 + 32 + 6 + 32 + 32)
        + (1 + 32 + 32)
        + (20 + 20)
        + 2
        + BOND_INSTRUCTION_SIZE * payload.transitionRecord.bondInstructions.len()
}

/// Encodes a `Proposed` payload, the inverse of [super::decode_proposed_event].
pub fn encode_proposed_event(payload: &ProposedEventPayload) -> CodecResult<Vec<u8>> {
    let mut out = Writer::with_capacity(encoded_proposed_event_size(payload));
    let proposal = &payload.proposal;
    let derivation = &payload.derivation;

    out.u48(proposal.id);
    out.address(proposal.proposer);
    out.u48(proposal.timestamp);
    out.u48(proposal.endOfSubmissionWindowTimestamp);

    out.u48(derivation.originBlockNumber);
    out.b256(derivation.originBlockHash);
    out.u8(derivation.basefeeSharingPctg);
    out.list("sources", &derivation.sources, |out, source| {
        out.u8(source.isForcedInclusion as u8);
        write_blob_slice(out, &source.blobSlice)
    })?;

    out.b256(proposal.coreStateHash);
    out.b256(proposal.derivationHash);

    let core_state = &payload.coreState;
    out.u48(core_state.nextProposalId);
    out.u48(core_state.lastProposalBlockId);
    out.u48(core_state.lastFinalizedProposalId);
    out.u48(core_state.lastCheckpointTimestamp);
    out.b256(core_state.lastFinalizedTransitionHash);
    out.b256(core_state.bondInstructionsHash);

    out.list("bondInstructions", &payload.bondInstructions, write_bond)?;
    Ok(out.buf)
}

/// Encodes a `Proved` payload, the inverse of [super::decode_proved_event].
pub fn encode_proved_event(payload: &ProvedEventPayload) -> CodecResult<Vec<u8>> {
    let mut out = Writer::with_capacity(encoded_proved_event_size(payload));
    let transition = &payload.transition;
    let record = &payload.transitionRecord;

    out.u48(payload.proposalId);
    out.b256(transition.proposalHash);
    out.b256(transition.parentTransitionHash);
    out.u48(transition.checkpoint.blockNumber);
    out.b256(transition.checkpoint.blockHash);
    out.b256(transition.checkpoint.stateRoot);

    out.u8(record.span);
    out.b256(record.transitionHash);
    out.b256(record.checkpointHash);

    out.address(payload.metadata.designatedProver);
    out.address(payload.metadata.actualProver);

    out.list("bondInstructions", &record.bondInstructions, write_bond)?;
    Ok(out.buf)
}

fn write_blob_slice(out: &mut Writer, slice: &BlobSlice) -> CodecResult<()> {
    out.list("blobHashes", &slice.blobHashes, |out, hash| {
        out.b256(*hash);
        Ok(())
    })?;
    out.u24(slice.offset);
    out.u48(slice.timestamp);
    Ok(())
}

fn write_bond(out: &mut Writer, bond: &BondInstruction) -> CodecResult<()> {
    out.u48(bond.proposalId);
    out.u8(bond.bondType);
    out.address(bond.payer);
    out.address(bond.payee);
    Ok(())
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn u24(&mut self, value: U24) {
        self.buf
            .extend_from_slice(&value.to::<u32>().to_be_bytes()[1..]);
    }

    fn u48(&mut self, value: U48) {
        self.buf
            .extend_from_slice(&value.to::<u64>().to_be_bytes()[2..]);
    }

    fn address(&mut self, value: Address) {
        self.buf.extend_from_slice(value.as_slice());
    }

    fn b256(&mut self, value: B256) {
        self.buf.extend_from_slice(value.as_slice());
    }

    fn list<T>(
        &mut self,
        field: &'static str,
        items: &[T],
        mut write: impl FnMut(&mut Self, &T) -> CodecResult<()>,
    ) -> CodecResult<()> {
        let len = u16::try_from(items.len()).map_err(|_| CodecError::CountOverflow {
            field,
            len: items.len(),
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        items.iter().try_for_each(|item| write(self, item))
    }
}

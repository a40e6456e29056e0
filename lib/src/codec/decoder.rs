use alloy_primitives::{
    aliases::{U24, U48},
    Address, B256,
};

use super::{CodecError, CodecResult};
use crate::{
    consts::MAX_BOND_TYPE,
    input::shasta::{
        BlobSlice, BondInstruction, Checkpoint, CoreState, Derivation, DerivationSource,
        Proposal, ProposedEventPayload, ProvedEventPayload, Transition, TransitionMetadata,
        TransitionRecord,
    },
};

/// Decodes the payload of a `Proposed` event.
pub fn decode_proposed_event(data: &[u8]) -> CodecResult<ProposedEventPayload> {
    let mut cursor = Cursor::new(data);

    let id = cursor.u48()?;
    let proposer = cursor.address()?;
    let timestamp = cursor.u48()?;
    let end_of_submission_window = cursor.u48()?;

    let origin_block_number = cursor.u48()?;
    let origin_block_hash = cursor.b256()?;
    let basefee_sharing_pctg = cursor.u8()?;
    let sources = cursor.list(|c| {
        Ok(DerivationSource {
            isForcedInclusion: c.u8()? != 0,
            blobSlice: read_blob_slice(c)?,
        })
    })?;

    let proposal = Proposal {
        id,
        timestamp,
        endOfSubmissionWindowTimestamp: end_of_submission_window,
        proposer,
        coreStateHash: cursor.b256()?,
        derivationHash: cursor.b256()?,
    };

    let core_state = CoreState {
        nextProposalId: cursor.u48()?,
        lastProposalBlockId: cursor.u48()?,
        lastFinalizedProposalId: cursor.u48()?,
        lastCheckpointTimestamp: cursor.u48()?,
        lastFinalizedTransitionHash: cursor.b256()?,
        bondInstructionsHash: cursor.b256()?,
    };

    // Bond types of proposed events are checked on L1 and passed through as is.
    let bond_instructions = cursor.list(|c| read_bond_instruction(c, false))?;
    cursor.finish()?;

    Ok(ProposedEventPayload {
        proposal,
        derivation: Derivation {
            originBlockNumber: origin_block_number,
            originBlockHash: origin_block_hash,
            basefeeSharingPctg: basefee_sharing_pctg,
            sources,
        },
        coreState: core_state,
        bondInstructions: bond_instructions,
    })
}

/// Decodes the payload of a `Proved` event.
pub fn decode_proved_event(data: &[u8]) -> CodecResult<ProvedEventPayload> {
    let mut cursor = Cursor::new(data);

    let proposal_id = cursor.u48()?;
    let transition = Transition {
        proposalHash: cursor.b256()?,
        parentTransitionHash: cursor.b256()?,
        checkpoint: Checkpoint {
            blockNumber: cursor.u48()?,
            blockHash: cursor.b256()?,
            stateRoot: cursor.b256()?,
        },
    };
    let span = cursor.u8()?;
    let transition_hash = cursor.b256()?;
    let checkpoint_hash = cursor.b256()?;
    let metadata = TransitionMetadata {
        designatedProver: cursor.address()?,
        actualProver: cursor.address()?,
    };
    let bond_instructions = cursor.list(|c| read_bond_instruction(c, true))?;
    cursor.finish()?;

    Ok(ProvedEventPayload {
        proposalId: proposal_id,
        transition,
        transitionRecord: TransitionRecord {
            span,
            bondInstructions: bond_instructions,
            transitionHash: transition_hash,
            checkpointHash: checkpoint_hash,
        },
        metadata,
    })
}

fn read_blob_slice(cursor: &mut Cursor<'_>) -> CodecResult<BlobSlice> {
    Ok(BlobSlice {
        blobHashes: cursor.list(Cursor::b256)?,
        offset: cursor.u24()?,
        timestamp: cursor.u48()?,
    })
}

fn read_bond_instruction(
    cursor: &mut Cursor<'_>,
    check_bond_type: bool,
) -> CodecResult<BondInstruction> {
    let proposal_id = cursor.u48()?;
    let bond_type = cursor.u8()?;
    if check_bond_type && bond_type > MAX_BOND_TYPE {
        return Err(CodecError::InvalidBondType(bond_type));
    }
    Ok(BondInstruction {
        proposalId: proposal_id,
        bondType: bond_type,
        payer: cursor.address()?,
        payee: cursor.address()?,
    })
}

/// Read position inside one event payload. Lives for a single decode call.
struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(CodecError::OffsetOverflow)?;
        let bytes = self
            .data
            .get(self.offset..end)
            .ok_or(CodecError::InsufficientBytes {
                need: len,
                offset: self.offset,
            })?;
        self.offset = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Right-aligns `N` big-endian bytes into a `u64`.
    fn word<const N: usize>(&mut self) -> CodecResult<u64> {
        let bytes = self.array::<N>()?;
        let mut word = [0u8; 8];
        word[8 - N..].copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(word))
    }

    fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u24(&mut self) -> CodecResult<U24> {
        Ok(U24::from_limbs([self.word::<3>()?]))
    }

    fn u48(&mut self) -> CodecResult<U48> {
        Ok(U48::from_limbs([self.word::<6>()?]))
    }

    fn address(&mut self) -> CodecResult<Address> {
        Ok(Address::from(self.array::<20>()?))
    }

    fn b256(&mut self) -> CodecResult<B256> {
        Ok(B256::from(self.array::<32>()?))
    }

    /// Reads a `u16` element count followed by exactly that many elements.
    fn list<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> CodecResult<T>,
    ) -> CodecResult<Vec<T>> {
        let len = self.u16()? as usize;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(read(self)?);
        }
        Ok(items)
    }

    fn finish(&self) -> CodecResult<()> {
        match self.data.len() - self.offset {
            0 => Ok(()),
            left => Err(CodecError::TrailingBytes(left)),
        }
    }
}

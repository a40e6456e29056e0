use alloy_primitives::aliases::U48;
use alloy_sol_types::sol;
use core::fmt::Debug;
use serde::{Deserialize, Serialize};

sol! {
    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    /// @notice Represents a frame of data that is stored in multiple blobs. Note the size is
    /// encoded as a bytes32 at the offset location.
    struct BlobSlice {
        /// @notice The blobs containing the proposal's content.
        bytes32[] blobHashes;
        /// @notice The byte offset of the proposal's content in the containing blobs.
        uint24 offset;
        /// @notice The timestamp when the frame was created.
        uint48 timestamp;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    /// @notice Represents a source of derivation data within a Derivation
    struct DerivationSource {
        /// @notice Whether this source is from a forced inclusion.
        bool isForcedInclusion;
        /// @notice Blobs that contain the source's manifest data.
        BlobSlice blobSlice;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    /// @notice Contains derivation data for a proposal that is not needed during proving.
    struct Derivation {
        /// @notice The L1 block number when the proposal was accepted.
        uint48 originBlockNumber;
        /// @notice The hash of the origin block.
        bytes32 originBlockHash;
        /// @notice The percentage of base fee paid to coinbase.
        uint8 basefeeSharingPctg;
        /// @notice Array of derivation sources, where each can be regular or forced inclusion.
        DerivationSource[] sources;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    /// @notice Represents a proposal for L2 blocks.
    struct Proposal {
        /// @notice Unique identifier for the proposal.
        uint48 id;
        /// @notice The L1 block timestamp when the proposal was accepted.
        uint48 timestamp;
        /// @notice The timestamp of the last slot where the current preconfer can propose.
        uint48 endOfSubmissionWindowTimestamp;
        /// @notice Address of the proposer.
        address proposer;
        /// @notice Hash of the core state after this proposal.
        bytes32 coreStateHash;
        /// @notice Hash of the proposal's derivation data.
        bytes32 derivationHash;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    /// @notice Represents the core state of the inbox.
    struct CoreState {
        uint48 nextProposalId;
        uint48 lastProposalBlockId;
        uint48 lastFinalizedProposalId;
        uint48 lastCheckpointTimestamp;
        bytes32 lastFinalizedTransitionHash;
        bytes32 bondInstructionsHash;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    struct BondInstruction {
        uint48 proposalId;
        uint8 bondType;
        address payer;
        address payee;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    struct Checkpoint {
        uint48 blockNumber;
        bytes32 blockHash;
        bytes32 stateRoot;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    struct Transition {
        bytes32 proposalHash;
        bytes32 parentTransitionHash;
        Checkpoint checkpoint;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    struct TransitionRecord {
        uint8 span;
        BondInstruction[] bondInstructions;
        bytes32 transitionHash;
        bytes32 checkpointHash;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    struct TransitionMetadata {
        address designatedProver;
        address actualProver;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    /// @notice Payload of the `Proposed` event.
    struct ProposedEventPayload {
        Proposal proposal;
        Derivation derivation;
        CoreState coreState;
        BondInstruction[] bondInstructions;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    /// @notice Payload of the `Proved` event.
    struct ProvedEventPayload {
        uint48 proposalId;
        Transition transition;
        TransitionRecord transitionRecord;
        TransitionMetadata metadata;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    /// @notice State of the anchor contract after the latest anchored block.
    struct BlockState {
        uint48 anchorBlockNumber;
        bytes32 ancestorsHash;
    }

    #[derive(Debug, PartialEq, Eq)]
    function anchorV4(Checkpoint calldata _checkpoint) external;

    function getBlockState() external view returns (BlockState memory);

    #[derive(Debug, Default, Deserialize, Serialize)]
    event Proposed(bytes data);

    #[derive(Debug, Default, Deserialize, Serialize)]
    event Proved(bytes data);
}

/// Narrows a 48-bit protocol integer to `u64`.
pub fn u48_to_u64(value: U48) -> u64 {
    value.to::<u64>()
}

impl ProposedEventPayload {
    pub fn proposal_id(&self) -> u64 {
        u48_to_u64(self.proposal.id)
    }

    pub fn proposal_timestamp(&self) -> u64 {
        u48_to_u64(self.proposal.timestamp)
    }

    pub fn origin_block_number(&self) -> u64 {
        u48_to_u64(self.derivation.originBlockNumber)
    }

    pub fn last_finalized_proposal_id(&self) -> u64 {
        u48_to_u64(self.coreState.lastFinalizedProposalId)
    }
}

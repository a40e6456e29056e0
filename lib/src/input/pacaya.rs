use alloy_sol_types::sol;
use core::fmt::Debug;
use serde::{Deserialize, Serialize};

use super::ontake;

sol! {
    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    struct BaseFeeConfig {
        uint8 adjustmentQuotient;
        uint8 sharingPctg;
        uint32 gasIssuancePerSecond;
        uint64 minGasExcess;
        uint32 maxGasIssuancePerBlock;
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    struct BlockParams {
        // Number of transactions in the block
        uint16 numTransactions;
        // Time shift in seconds
        uint8 timeShift;
        // Signals sent on L1 and need to sync to this L2 block.
        bytes32[] signalSlots;
    }

    #[derive(Debug, Default, Deserialize, Serialize)]
    /// @dev This struct holds batch information essential for constructing blocks offchain, but it
    /// does not include data necessary for batch proving.
    struct BatchInfo {
        bytes32 txsHash;
        // Data to build L2 blocks
        BlockParams[] blocks;
        bytes32[] blobHashes;
        bytes32 extraData;
        address coinbase;
        uint64 proposedIn; // Used by node/client
        uint64 blobCreatedIn;
        uint32 blobByteOffset;
        uint32 blobByteSize;
        uint32 gasLimit;
        uint64 lastBlockId;
        uint64 lastBlockTimestamp;
        // Data for the L2 anchor transaction, shared by all blocks in the batch
        uint64 anchorBlockId;
        // corresponds to the `_anchorStateRoot` parameter in the anchor transaction.
        // The batch's validity proof shall verify the integrity of these two values.
        bytes32 anchorBlockHash;
        BaseFeeConfig baseFeeConfig;
    }

    #[derive(Debug, Default, Deserialize, Serialize)]
    /// @dev This struct holds batch metadata essential for proving the batch.
    struct BatchMetadata {
        bytes32 infoHash;
        address proposer;
        uint64 batchId;
        uint64 proposedAt; // Used by node/client
    }

    #[derive(Debug, Default, Deserialize, Serialize)]
    struct Batch {
        bytes32 metaHash;
        uint64 lastBlockId;
        uint96 reserved3;
        uint96 livenessBond;
        uint64 batchId;
        uint64 lastBlockTimestamp;
        uint64 anchorBlockId;
        uint24 nextTransitionId;
        uint8 reserved4;
        uint24 verifiedTransitionId;
    }

    #[derive(Debug, Default, Deserialize, Serialize)]
    struct TransitionState {
        bytes32 parentHash;
        bytes32 blockHash;
        bytes32 stateRoot;
        address prover;
        bool inProvingWindow;
        uint48 createdAt;
    }

    /// @notice Emitted when a batch is proposed.
    /// @param info The info of the proposed batch.
    /// @param meta The metadata of the proposed batch.
    /// @param txList The tx list in calldata.
    #[derive(Debug, Default, Deserialize, Serialize)]
    event BatchProposed(BatchInfo info, BatchMetadata meta, bytes txList);

    #[derive(Debug, Default, Deserialize, Serialize)]
    struct Stats2 {
        uint64 numBatches;
        uint64 lastVerifiedBatchId;
        bool paused;
        uint56 lastProposedIn;
        uint64 lastUnpausedAt;
    }

    function getStats2() external view returns (Stats2 memory);

    function getBatch(uint64 _batchId) external view returns (Batch memory batch_);

    function getLastVerifiedTransition()
        external
        view
        returns (uint64 batchId_, uint64 blockId_, TransitionState memory ts_);

    #[derive(Debug, PartialEq, Eq)]
    function anchorV3(
        uint64 _anchorBlockId,
        bytes32 _anchorStateRoot,
        uint32 _parentGasUsed,
        BaseFeeConfig calldata _baseFeeConfig,
        bytes32[] calldata _signalSlots
    )
        external;

    function getBasefeeV2(
        uint32 _parentGasUsed,
        uint64 _blockTimestamp,
        BaseFeeConfig calldata _baseFeeConfig
    )
        public
        view
        returns (uint256 basefee_, uint64 newGasTarget_, uint64 newGasExcess_);
}

impl From<&ontake::BaseFeeConfig> for BaseFeeConfig {
    fn from(config: &ontake::BaseFeeConfig) -> Self {
        BaseFeeConfig {
            adjustmentQuotient: config.adjustmentQuotient,
            sharingPctg: config.sharingPctg,
            gasIssuancePerSecond: config.gasIssuancePerSecond,
            minGasExcess: config.minGasExcess,
            maxGasIssuancePerBlock: config.maxGasIssuancePerBlock,
        }
    }
}

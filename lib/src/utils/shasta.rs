//! Block fields that Shasta derives locally instead of reading from L1.
use alloy_primitives::Bytes;

/// Block time target for EIP-4396 base fee calculation (2 seconds)
const BLOCK_TIME_TARGET: u64 = 2;
/// Maximum gas target percentage (95%)
const MAX_GAS_TARGET_PERCENTAGE: u64 = 95;

/// Minimum allowed base fee for Shasta blocks (0.005 Gwei)
pub const MIN_BASE_FEE_SHASTA: u64 = 5_000_000;
/// Maximum allowed base fee for Shasta blocks (1 Gwei)
pub const MAX_BASE_FEE_SHASTA: u64 = 1_000_000_000;
/// Base fee of the first Shasta block.
pub const SHASTA_INITIAL_BASE_FEE: u64 = 25_000_000;
/// Bounds the amount the base fee can change between blocks.
pub const DEFAULT_BASE_FEE_CHANGE_DENOMINATOR: u64 = 8;
/// Bounds the maximum gas limit an EIP-1559 block may have.
pub const DEFAULT_ELASTICITY_MULTIPLIER: u64 = 2;

/// The parent values the next base fee depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentGasInfo {
    pub gas_limit: u64,
    pub gas_used: u64,
    pub base_fee: u64,
    pub timestamp: u64,
}

/// `[basefeeSharingPctg, isLowBondProposal]`
pub fn encode_shasta_extra_data(basefee_sharing_pctg: u8, is_low_bond_proposal: bool) -> Bytes {
    Bytes::from(vec![basefee_sharing_pctg, is_low_bond_proposal as u8])
}

/// Clamp the provided base fee to the min and max allowed for Shasta blocks.
pub fn clamp_shasta_base_fee(base_fee: u64) -> u64 {
    base_fee.clamp(MIN_BASE_FEE_SHASTA, MAX_BASE_FEE_SHASTA)
}

/// Base fee of a Shasta block at `timestamp` following `parent`.
///
/// `first_shasta_block` is set when the parent predates the fork.
pub fn shasta_base_fee(parent: &ParentGasInfo, timestamp: u64, first_shasta_block: bool) -> u64 {
    if first_shasta_block {
        return SHASTA_INITIAL_BASE_FEE;
    }
    calc_next_shasta_base_fee(
        parent.gas_limit,
        parent.gas_used,
        parent.base_fee,
        timestamp.saturating_sub(parent.timestamp),
        DEFAULT_ELASTICITY_MULTIPLIER,
        DEFAULT_BASE_FEE_CHANGE_DENOMINATOR,
    )
}

/// Calculates the next base fee for Shasta blocks according to EIP-4396 logic.
pub fn calc_next_shasta_base_fee(
    parent_gas_limit: u64,
    parent_gas_used: u64,
    parent_base_fee: u64,
    parent_block_time: u64,
    elasticity_multiplier: u64,
    base_fee_change_denominator: u64,
) -> u64 {
    let parent_gas_target = parent_gas_limit / elasticity_multiplier;

    // min(target * blockTime / blockTimeTarget, gasLimit * 95%)
    let time_scaled_target =
        parent_gas_target.saturating_mul(parent_block_time) / BLOCK_TIME_TARGET;
    let capped_target = parent_gas_limit.saturating_mul(MAX_GAS_TARGET_PERCENTAGE) / 100;
    let parent_adjusted_gas_target = time_scaled_target.min(capped_target);

    if parent_gas_used == parent_adjusted_gas_target {
        return clamp_shasta_base_fee(parent_base_fee);
    }

    let adjustment = |gas_used_delta: u64| {
        (parent_base_fee as u128 * gas_used_delta as u128)
            .checked_div(parent_gas_target as u128)
            .unwrap_or(0)
            .checked_div(base_fee_change_denominator as u128)
            .unwrap_or(0)
            .min(u64::MAX as u128) as u64
    };

    if parent_gas_used > parent_adjusted_gas_target {
        // max(1, parentBaseFee * gasUsedDelta / parentGasTarget / baseFeeChangeDenominator)
        let delta = adjustment(parent_gas_used - parent_adjusted_gas_target).max(1);
        clamp_shasta_base_fee(parent_base_fee.saturating_add(delta))
    } else {
        let delta = adjustment(parent_adjusted_gas_target - parent_gas_used);
        clamp_shasta_base_fee(parent_base_fee.saturating_sub(delta))
    }
}

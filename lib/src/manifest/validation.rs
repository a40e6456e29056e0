use alloy_primitives::Address;
use tracing::{debug, warn};

use super::types::{BlockManifest, ProposalManifest};
use crate::consts::{
    ANCHOR_MAX_OFFSET, ANCHOR_V3_V4_GAS_LIMIT, GAS_LIMIT_CHANGE_DENOMINATOR,
    MAX_BLOCK_GAS_LIMIT, MAX_BLOCK_GAS_LIMIT_CHANGE_PERMYRIAD, MIN_BLOCK_GAS_LIMIT,
    TIMESTAMP_MAX_OFFSET,
};

/// Everything a source manifest is checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestContext {
    pub proposer: Address,
    pub proposal_timestamp: u64,
    pub origin_block_number: u64,
    /// Shasta activation timestamp.
    pub fork_timestamp: u64,
    pub is_forced_inclusion: bool,
    pub parent_number: u64,
    pub parent_timestamp: u64,
    /// Header gas limit of the parent, including the anchor reservation.
    pub parent_gas_limit: u64,
    pub parent_anchor_block_number: u64,
}

impl ManifestContext {
    /// The parent gas limit available to user transactions.
    pub fn parent_effective_gas_limit(&self) -> u64 {
        if self.parent_number == 0 {
            self.parent_gas_limit
        } else {
            self.parent_gas_limit.saturating_sub(ANCHOR_V3_V4_GAS_LIMIT)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("block {index}: timestamp {timestamp} outside [{lower}, {upper}]")]
    Timestamp {
        index: usize,
        timestamp: u64,
        lower: u64,
        upper: u64,
    },
    #[error("block {index}: anchor block {anchor} below previous anchor {previous}")]
    AnchorDecreasing {
        index: usize,
        anchor: u64,
        previous: u64,
    },
    #[error("block {index}: anchor block {anchor} is ahead of origin block {origin}")]
    AnchorInFuture { index: usize, anchor: u64, origin: u64 },
    #[error("block {index}: anchor block {anchor} older than {min}")]
    AnchorTooOld { index: usize, anchor: u64, min: u64 },
    #[error("no block advances the anchor past {parent}")]
    AnchorNotAdvanced { parent: u64 },
    #[error("block {index}: gas limit {gas_limit} outside [{lower}, {upper}]")]
    GasLimit {
        index: usize,
        gas_limit: u64,
        lower: u64,
        upper: u64,
    },
}

/// Allowed `[lower, upper]` timestamps for a block following `parent_timestamp`.
pub fn timestamp_bounds(
    parent_timestamp: u64,
    fork_timestamp: u64,
    proposal_timestamp: u64,
) -> (u64, u64) {
    let lower = (parent_timestamp + 1)
        .max(fork_timestamp)
        .max(proposal_timestamp.saturating_sub(TIMESTAMP_MAX_OFFSET));
    (lower, proposal_timestamp)
}

/// Allowed `[lower, upper]` gas limits for a block following one with `parent_gas_limit`.
pub fn gas_limit_bounds(parent_gas_limit: u64) -> (u64, u64) {
    let scaled = |permyriad: u64| {
        (parent_gas_limit as u128 * permyriad as u128 / GAS_LIMIT_CHANGE_DENOMINATOR as u128)
            as u64
    };
    let upper = MAX_BLOCK_GAS_LIMIT
        .min(scaled(GAS_LIMIT_CHANGE_DENOMINATOR + MAX_BLOCK_GAS_LIMIT_CHANGE_PERMYRIAD));
    let lower = MIN_BLOCK_GAS_LIMIT
        .max(scaled(GAS_LIMIT_CHANGE_DENOMINATOR - MAX_BLOCK_GAS_LIMIT_CHANGE_PERMYRIAD))
        .min(upper);
    (lower, upper)
}

/// Normalizes and checks the blocks of a proposer-supplied source.
///
/// Zero coinbase becomes the proposer, zero gas limit and zero anchor inherit
/// from the previous block. Each block is then bounded by the previous one.
pub fn validate_normal_manifest(
    blocks: &mut [BlockManifest],
    ctx: &ManifestContext,
) -> Result<(), ValidationError> {
    let mut parent_timestamp = ctx.parent_timestamp;
    let mut parent_gas_limit = ctx.parent_effective_gas_limit();
    let mut parent_anchor = ctx.parent_anchor_block_number;
    let min_anchor = ctx.origin_block_number.saturating_sub(ANCHOR_MAX_OFFSET);

    for (index, block) in blocks.iter_mut().enumerate() {
        if block.coinbase == Address::ZERO {
            block.coinbase = ctx.proposer;
        }
        if block.gas_limit == 0 {
            block.gas_limit = parent_gas_limit;
        }
        if block.anchor_block_number == 0 {
            block.anchor_block_number = parent_anchor;
        }

        let (lower, upper) =
            timestamp_bounds(parent_timestamp, ctx.fork_timestamp, ctx.proposal_timestamp);
        if block.timestamp < lower || block.timestamp > upper {
            return Err(ValidationError::Timestamp {
                index,
                timestamp: block.timestamp,
                lower,
                upper,
            });
        }

        let anchor = block.anchor_block_number;
        if anchor < parent_anchor {
            return Err(ValidationError::AnchorDecreasing {
                index,
                anchor,
                previous: parent_anchor,
            });
        }
        if anchor > ctx.origin_block_number {
            return Err(ValidationError::AnchorInFuture {
                index,
                anchor,
                origin: ctx.origin_block_number,
            });
        }
        if anchor < min_anchor {
            return Err(ValidationError::AnchorTooOld {
                index,
                anchor,
                min: min_anchor,
            });
        }

        let (lower, upper) = gas_limit_bounds(parent_gas_limit);
        if block.gas_limit < lower || block.gas_limit > upper {
            return Err(ValidationError::GasLimit {
                index,
                gas_limit: block.gas_limit,
                lower,
                upper,
            });
        }

        parent_timestamp = block.timestamp;
        parent_gas_limit = block.gas_limit;
        parent_anchor = anchor;
    }

    if !ctx.is_forced_inclusion
        && !blocks
            .iter()
            .any(|block| block.anchor_block_number > ctx.parent_anchor_block_number)
    {
        return Err(ValidationError::AnchorNotAdvanced {
            parent: ctx.parent_anchor_block_number,
        });
    }
    Ok(())
}

/// A forced inclusion carries exactly one block and no metadata of its own.
pub fn validate_forced_inclusion_manifest(manifest: &ProposalManifest) -> bool {
    match manifest.blocks.as_slice() {
        [block] => {
            block.timestamp == 0
                && block.coinbase == Address::ZERO
                && block.anchor_block_number == 0
                && block.gas_limit == 0
        }
        _ => false,
    }
}

/// Fills every block's metadata from its predecessor, starting at the parent.
pub fn apply_inherited_metadata(blocks: &mut [BlockManifest], ctx: &ManifestContext) {
    let mut parent_timestamp = ctx.parent_timestamp;
    let gas_limit = ctx.parent_effective_gas_limit();
    for block in blocks.iter_mut() {
        let (lower, _) =
            timestamp_bounds(parent_timestamp, ctx.fork_timestamp, ctx.proposal_timestamp);
        block.timestamp = lower;
        block.coinbase = ctx.proposer;
        block.anchor_block_number = ctx.parent_anchor_block_number;
        block.gas_limit = gas_limit;
        parent_timestamp = lower;
    }
}

/// Turns a decoded source into the blocks that will actually be built.
///
/// Anything that is not a fully valid manifest is replaced as a whole by the
/// default manifest carrying inherited metadata.
pub fn resolve_source_manifest(
    manifest: ProposalManifest,
    ctx: &ManifestContext,
) -> ProposalManifest {
    let mut resolved = if ctx.is_forced_inclusion {
        if !manifest.default && validate_forced_inclusion_manifest(&manifest) {
            manifest
        } else {
            warn!("invalid forced inclusion source, using default manifest");
            ProposalManifest::default()
        }
    } else if manifest.default {
        manifest
    } else {
        let mut manifest = manifest;
        match validate_normal_manifest(&mut manifest.blocks, ctx) {
            Ok(()) => {
                debug!("manifest with {} blocks accepted", manifest.blocks.len());
                return manifest;
            }
            Err(e) => {
                warn!("manifest rejected, using inherited metadata: {e}");
                ProposalManifest::default()
            }
        }
    };
    apply_inherited_metadata(&mut resolved.blocks, ctx);
    resolved
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const PROPOSER: Address = Address::repeat_byte(0xbe);

    fn context() -> ManifestContext {
        ManifestContext {
            proposer: PROPOSER,
            proposal_timestamp: 10_000,
            origin_block_number: 120,
            fork_timestamp: 0,
            is_forced_inclusion: false,
            parent_number: 50,
            parent_timestamp: 9_990,
            parent_gas_limit: 60_000_000 + ANCHOR_V3_V4_GAS_LIMIT,
            parent_anchor_block_number: 95,
        }
    }

    fn block(timestamp: u64, anchor: u64, gas_limit: u64) -> BlockManifest {
        BlockManifest {
            timestamp,
            coinbase: Address::repeat_byte(0x01),
            anchor_block_number: anchor,
            gas_limit,
            transactions: vec![],
        }
    }

    fn ctx_with_origin(origin: u64) -> ManifestContext {
        ManifestContext {
            origin_block_number: origin,
            parent_anchor_block_number: 95,
            ..context()
        }
    }

    #[test]
    fn effective_gas_limit_skips_anchor_reservation() {
        assert_eq!(context().parent_effective_gas_limit(), 60_000_000);
        let genesis = ManifestContext {
            parent_number: 0,
            parent_gas_limit: 30_000_000,
            ..context()
        };
        assert_eq!(genesis.parent_effective_gas_limit(), 30_000_000);
    }

    #[test]
    fn gas_limit_bounds_around_sixty_million() {
        assert_eq!(gas_limit_bounds(60_000_000), (59_940_000, 60_060_000));
        // the floor never exceeds the ceiling
        assert_eq!(gas_limit_bounds(5_000_000), (5_005_000, 5_005_000));
        assert_eq!(gas_limit_bounds(200_000_000).1, MAX_BLOCK_GAS_LIMIT);
    }

    #[rstest]
    #[case(59_940_000, true)]
    #[case(60_060_000, true)]
    #[case(60_000_000, true)]
    #[case(59_939_999, false)]
    #[case(60_060_001, false)]
    fn gas_limit_window(#[case] gas_limit: u64, #[case] accepted: bool) {
        let mut blocks = vec![block(9_995, 100, gas_limit)];
        let result = validate_normal_manifest(&mut blocks, &context());
        assert_eq!(result.is_ok(), accepted, "{result:?}");
    }

    #[test]
    fn gas_limit_chains_from_previous_block() {
        // 60_060_000 then +0.1% of that, beyond +0.1% of the parent
        let mut blocks = vec![block(9_995, 100, 60_060_000), block(9_996, 100, 60_120_060)];
        assert_eq!(validate_normal_manifest(&mut blocks, &context()), Ok(()));
    }

    #[test]
    fn rejects_decreasing_anchor() {
        let mut blocks = vec![
            block(9_995, 100, 60_000_000),
            block(9_996, 99, 60_000_000),
            block(9_997, 101, 60_000_000),
        ];
        assert_eq!(
            validate_normal_manifest(&mut blocks, &context()),
            Err(ValidationError::AnchorDecreasing {
                index: 1,
                anchor: 99,
                previous: 100
            })
        );
    }

    #[test]
    fn zero_anchor_and_gas_limit_inherit() {
        let mut blocks = vec![block(9_995, 100, 60_000_000), block(9_996, 0, 0)];
        blocks[1].coinbase = Address::ZERO;
        validate_normal_manifest(&mut blocks, &context()).unwrap();
        assert_eq!(blocks[1].anchor_block_number, 100);
        assert_eq!(blocks[1].gas_limit, 60_000_000);
        assert_eq!(blocks[1].coinbase, PROPOSER);
    }

    #[rstest]
    #[case::future(ctx_with_origin(99), 100, false)]
    #[case::at_origin(ctx_with_origin(100), 100, true)]
    #[case::too_old(ctx_with_origin(300), 100, false)]
    #[case::oldest_allowed(ctx_with_origin(228), 100, true)]
    fn anchor_window(#[case] ctx: ManifestContext, #[case] anchor: u64, #[case] ok: bool) {
        let mut blocks = vec![block(9_995, anchor, 60_000_000)];
        assert_eq!(validate_normal_manifest(&mut blocks, &ctx).is_ok(), ok);
    }

    #[test]
    fn anchor_must_advance_for_normal_sources() {
        let mut blocks = vec![block(9_995, 95, 60_000_000)];
        assert_eq!(
            validate_normal_manifest(&mut blocks, &context()),
            Err(ValidationError::AnchorNotAdvanced { parent: 95 })
        );

        let forced = ManifestContext {
            is_forced_inclusion: true,
            ..context()
        };
        let mut blocks = vec![block(9_995, 95, 60_000_000)];
        assert_eq!(validate_normal_manifest(&mut blocks, &forced), Ok(()));
    }

    #[rstest]
    #[case::equal_to_parent(9_990, false)]
    #[case::first_allowed(9_991, true)]
    #[case::proposal_time(10_000, true)]
    #[case::after_proposal(10_001, false)]
    fn timestamp_window(#[case] timestamp: u64, #[case] ok: bool) {
        let mut blocks = vec![block(timestamp, 100, 60_000_000)];
        assert_eq!(validate_normal_manifest(&mut blocks, &context()).is_ok(), ok);
    }

    #[test]
    fn timestamp_lower_bound_terms() {
        assert_eq!(timestamp_bounds(10, 0, 1_000), (616, 1_000));
        assert_eq!(timestamp_bounds(900, 0, 1_000), (901, 1_000));
        assert_eq!(timestamp_bounds(10, 950, 1_000), (950, 1_000));
    }

    #[test]
    fn rejected_manifest_is_replaced_whole() {
        let manifest = ProposalManifest {
            blocks: vec![
                block(9_995, 100, 60_000_000),
                block(9_996, 99, 60_000_000),
                block(9_997, 101, 60_000_000),
            ],
            default: false,
        };
        let resolved = resolve_source_manifest(manifest, &context());
        assert!(resolved.default);
        assert_eq!(
            resolved.blocks,
            vec![BlockManifest {
                timestamp: 9_991,
                coinbase: PROPOSER,
                anchor_block_number: 95,
                gas_limit: 60_000_000,
                transactions: vec![],
            }]
        );
    }

    #[test]
    fn accepted_manifest_is_kept() {
        let manifest = ProposalManifest {
            blocks: vec![block(9_995, 100, 60_000_000), block(9_999, 101, 60_000_000)],
            default: false,
        };
        let resolved = resolve_source_manifest(manifest.clone(), &context());
        assert_eq!(resolved, manifest);
    }

    #[test]
    fn forced_inclusion_keeps_transactions_with_inherited_metadata() {
        let ctx = ManifestContext {
            is_forced_inclusion: true,
            ..context()
        };
        let mut manifest = ProposalManifest {
            blocks: vec![BlockManifest::default()],
            default: false,
        };
        assert!(validate_forced_inclusion_manifest(&manifest));
        let resolved = resolve_source_manifest(manifest.clone(), &ctx);
        assert!(!resolved.default);
        assert_eq!(resolved.blocks[0].coinbase, PROPOSER);
        assert_eq!(resolved.blocks[0].timestamp, 9_991);

        manifest.blocks[0].gas_limit = 1;
        assert!(!validate_forced_inclusion_manifest(&manifest));
        assert!(resolve_source_manifest(manifest, &ctx).default);
    }

    #[test]
    fn inherited_timestamps_advance_per_block() {
        let mut blocks = vec![BlockManifest::default(); 3];
        apply_inherited_metadata(&mut blocks, &context());
        assert_eq!(
            blocks.iter().map(|b| b.timestamp).collect::<Vec<_>>(),
            vec![9_991, 9_992, 9_993]
        );
    }
}

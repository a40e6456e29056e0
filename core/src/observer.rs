use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc::Sender,
};

use tracing::debug;

/// The last proposal an inserter has processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastSeenProposal {
    pub proposal_id: u64,
    pub last_block_id: u64,
    /// Whether the blocks were inserted, replacing any preconfirmed ones.
    pub preconf_chain_reorged: bool,
}

/// Called once an inserter is done with a proposal.
pub trait ProposalObserver: Send + Sync {
    fn on_latest_seen_proposal(&self, proposal: LastSeenProposal);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProposalObserver for NoopObserver {
    fn on_latest_seen_proposal(&self, _proposal: LastSeenProposal) {}
}

impl ProposalObserver for Sender<LastSeenProposal> {
    fn on_latest_seen_proposal(&self, proposal: LastSeenProposal) {
        if self.send(proposal).is_err() {
            debug!(
                "receiver of latest seen proposals is gone, dropping proposal {}",
                proposal.proposal_id
            );
        }
    }
}

/// Head gauges updated by the inserters.
pub trait MetricsSink: Send + Sync {
    fn set_l2_head_height(&self, height: u64);

    fn set_l2_preconf_head_height(&self, height: u64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_l2_head_height(&self, _height: u64) {}

    fn set_l2_preconf_head_height(&self, _height: u64) {}
}

/// Keeps the latest values, for callers that export them elsewhere.
#[derive(Debug, Default)]
pub struct HeadGauges {
    pub l2_head_height: AtomicU64,
    pub l2_preconf_head_height: AtomicU64,
}

impl MetricsSink for HeadGauges {
    fn set_l2_head_height(&self, height: u64) {
        self.l2_head_height.store(height, Ordering::Relaxed);
    }

    fn set_l2_preconf_head_height(&self, height: u64) {
        self.l2_preconf_head_height.store(height, Ordering::Relaxed);
    }
}

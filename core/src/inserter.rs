//! Fork specific block insertion.
//!
//! One inserter per fork turns a proposal delivered from L1 into L2 blocks
//! through the engine API. Each inserter serializes its proposals and its
//! preconfirmation blocks behind a single lock.

use std::sync::Arc;

use taiko_driver_lib::{consts::ProtocolSpec, input::ProposalMetadata};

use crate::{
    anchor::AnchorTxConstructor,
    interfaces::DriverResult,
    observer::{LastSeenProposal, MetricsSink, NoopMetrics, NoopObserver, ProposalObserver},
    preconf::PreconfEnvelope,
    provider::BlockHeader,
};

pub mod common;
mod ontake;
mod pacaya;
mod shasta;

pub use ontake::OntakeInserter;
pub use pacaya::PacayaInserter;
pub use shasta::{fetch_source_manifest, ShastaInserter};

/// Collaborators shared by all inserters.
pub struct InserterContext<E, L, R> {
    pub engine: E,
    pub l1: L,
    pub protocol: R,
    pub anchor: AnchorTxConstructor,
    pub spec: ProtocolSpec,
    pub observer: Arc<dyn ProposalObserver>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl<E, L, R> InserterContext<E, L, R> {
    pub fn new(engine: E, l1: L, protocol: R, spec: ProtocolSpec) -> DriverResult<Self> {
        Ok(Self {
            engine,
            l1,
            protocol,
            anchor: AnchorTxConstructor::new(&spec)?,
            spec,
            observer: Arc::new(NoopObserver),
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProposalObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn notify(&self, proposal_id: u64, last_block_id: u64, preconf_chain_reorged: bool) {
        self.observer.on_latest_seen_proposal(LastSeenProposal {
            proposal_id,
            last_block_id,
            preconf_chain_reorged,
        });
    }
}

#[allow(async_fn_in_trait)]
pub trait BlockInserter {
    /// Inserts the blocks of `proposal` and returns the id of its last block.
    async fn insert_blocks(&self, proposal: &ProposalMetadata) -> DriverResult<u64>;

    /// Inserts already built blocks received from the preconfirmation network.
    async fn insert_preconf_blocks_from_envelopes(
        &self,
        envelopes: &[PreconfEnvelope],
        from_cache: bool,
    ) -> DriverResult<Vec<BlockHeader>>;
}

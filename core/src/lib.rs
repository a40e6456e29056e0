use std::sync::Arc;

use serde_json::Value;
use taiko_driver_lib::{consts::Fork, input::ProposalMetadata};
use tracing::{debug, info};

use crate::{
    inserter::{BlockInserter, InserterContext, OntakeInserter, PacayaInserter, ShastaInserter},
    interfaces::{DriverConfig, DriverResult},
    preconf::PreconfEnvelope,
    provider::{
        rpc::{RpcExecutionEngine, RpcL1Source, RpcProtocolReader},
        BlockHeader, ExecutionEngine, L1DataSource, ProtocolStateReader,
    },
};

pub mod anchor;
pub mod inserter;
pub mod interfaces;
pub mod observer;
pub mod preconf;
pub mod provider;

/// Routes proposals and preconfirmation blocks to the inserter of their fork.
pub struct Driver<E, L, R> {
    ctx: Arc<InserterContext<E, L, R>>,
    ontake: OntakeInserter<E, L, R>,
    pacaya: PacayaInserter<E, L, R>,
    shasta: ShastaInserter<E, L, R>,
}

pub type RpcDriver = Driver<RpcExecutionEngine, RpcL1Source, RpcProtocolReader>;

impl RpcDriver {
    /// A driver talking to the endpoints of `config`.
    pub fn connect(config: &DriverConfig) -> DriverResult<Self> {
        let engine = RpcExecutionEngine::new(&config.l2_rpc, &config.l2_engine)?;
        let l1 = RpcL1Source::new(&config.l1_rpc, &config.l1_beacon_rpc, &config.spec)?;
        let protocol = RpcProtocolReader::new(&config.l1_rpc, &config.l2_rpc, &config.spec)?;
        info!(
            "Driver for {} (chain {}) connected to L2 engine {}",
            config.spec.name,
            config.spec.chain_id(),
            config.l2_engine
        );
        Ok(Driver::new(InserterContext::new(
            engine,
            l1,
            protocol,
            config.spec.clone(),
        )?))
    }
}

impl<E, L, R> Driver<E, L, R>
where
    E: ExecutionEngine,
    L: L1DataSource,
    R: ProtocolStateReader,
{
    pub fn new(ctx: InserterContext<E, L, R>) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            ontake: OntakeInserter::new(ctx.clone()),
            pacaya: PacayaInserter::new(ctx.clone()),
            shasta: ShastaInserter::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &InserterContext<E, L, R> {
        &self.ctx
    }

    /// Inserts the blocks of a proposal, returning the id of its last block.
    pub async fn insert_blocks(&self, proposal: &ProposalMetadata) -> DriverResult<u64> {
        debug!(
            "Inserting {} proposal {} from L1 block {}",
            proposal.fork(),
            proposal.id(),
            proposal.l1().block_height
        );
        match proposal.fork() {
            Fork::Ontake => self.ontake.insert_blocks(proposal).await,
            Fork::Pacaya => self.pacaya.insert_blocks(proposal).await,
            Fork::Shasta => self.shasta.insert_blocks(proposal).await,
        }
    }

    /// Inserts preconfirmation blocks with the inserter of the fork active at
    /// the first of them.
    pub async fn insert_preconf_blocks_from_envelopes(
        &self,
        envelopes: &[PreconfEnvelope],
        from_cache: bool,
    ) -> DriverResult<Vec<BlockHeader>> {
        let Some(first) = envelopes.first() else {
            return Ok(Vec::new());
        };
        let fork = self
            .ctx
            .spec
            .active_fork(first.payload.block_number, first.payload.timestamp)?;
        match fork {
            Fork::Ontake => {
                self.ontake
                    .insert_preconf_blocks_from_envelopes(envelopes, from_cache)
                    .await
            }
            Fork::Pacaya => {
                self.pacaya
                    .insert_preconf_blocks_from_envelopes(envelopes, from_cache)
                    .await
            }
            Fork::Shasta => {
                self.shasta
                    .insert_preconf_blocks_from_envelopes(envelopes, from_cache)
                    .await
            }
        }
    }
}

/// Merges a partial JSON config into `a`, nulls in `b` leave `a` unchanged.
pub fn merge(a: &mut Value, b: &Value) {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, v) in b {
                merge(a.entry(k).or_insert(Value::Null), v);
            }
        }
        (a, b) if !b.is_null() => b.clone_into(a),
        // If b is null, just keep a (which means do nothing).
        _ => {}
    }
}

#[cfg(test)]
mod tests;

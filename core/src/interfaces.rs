use crate::merge;
use alloy_primitives::Address;
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{path::Path, str::FromStr};
use taiko_driver_lib::{
    codec::CodecError,
    consts::{Network, ProtocolSpec},
    signer::SignerError,
};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// For invalid driver configuration.
    #[error("Invalid driver config: {0}")]
    InvalidConfig(String),

    /// For RPC errors.
    #[error("There was an error with the RPC provider: {0}")]
    RPC(String),

    /// The execution engine answered, but not with what the protocol requires.
    #[error("Unexpected execution engine response: {0}")]
    Engine(String),

    /// The blob could not be fetched at all.
    #[error("Blob unavailable: {0}")]
    BlobUnavailable(String),

    /// The blob was fetched but its content is unusable.
    #[error("Invalid blob: {0}")]
    InvalidBlob(String),

    #[error("L1 origin not found for block {0}")]
    MissingL1Origin(u64),

    /// A preconfirmed block that cannot extend the local chain.
    #[error("Invalid preconfirmation block: {0}")]
    Preconf(String),

    /// A block on the local chain differs from the one being derived.
    #[error("Block is not known in the canonical chain: {0}")]
    UnknownBlock(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// For anchor transaction signing errors.
    #[error("There was an error signing the anchor transaction: {0}")]
    Signer(#[from] SignerError),

    /// For event decoding errors.
    #[error("There was an error decoding the event payload: {0}")]
    Codec(#[from] CodecError),

    /// For I/O errors.
    #[error("There was a I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// For Serde errors.
    #[error("There was a deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A failure wrapped with the step and ids it happened at.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DriverError>,
    },

    /// A catch-all error for any other error type.
    #[error("There was an unexpected error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl DriverError {
    /// Wraps the error with a description of what was being processed.
    pub fn context(self, context: impl Into<String>) -> Self {
        DriverError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping all context layers.
    pub fn root(&self) -> &DriverError {
        match self {
            DriverError::Context { source, .. } => source.root(),
            e => e,
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Attaches context to any [DriverResult].
pub trait DriverResultExt<T> {
    fn context_with<C: Into<String>>(self, f: impl FnOnce() -> C) -> DriverResult<T>;
}

impl<T> DriverResultExt<T> for DriverResult<T> {
    fn context_with<C: Into<String>>(self, f: impl FnOnce() -> C) -> DriverResult<T> {
        self.map_err(|e| e.context(f()))
    }
}

#[derive(Default, Clone, Serialize, Deserialize, Debug, Args)]
#[serde(default)]
/// A partial driver config, from the command line or a file.
pub struct DriverConfigOpt {
    #[arg(long, require_equals = true, env = "L1_RPC")]
    /// L1 execution JSON-RPC endpoint.
    pub l1_rpc: Option<String>,
    #[arg(long, require_equals = true, env = "L1_BEACON_RPC")]
    /// L1 beacon node endpoint, used for blob sidecars.
    pub l1_beacon_rpc: Option<String>,
    #[arg(long, require_equals = true, env = "L2_RPC")]
    /// L2 execution JSON-RPC endpoint.
    pub l2_rpc: Option<String>,
    #[arg(long, require_equals = true, env = "L2_ENGINE")]
    /// L2 authenticated engine endpoint.
    pub l2_engine: Option<String>,
    #[arg(long, require_equals = true, env = "NETWORK")]
    /// The Taiko network to follow.
    pub network: Option<String>,
    #[arg(long, require_equals = true)]
    /// Overrides the network's anchor contract address.
    pub anchor_address: Option<Address>,
    #[arg(long, require_equals = true)]
    /// Overrides the network's L1 inbox contract address.
    pub inbox_address: Option<Address>,
    #[arg(long, require_equals = true)]
    /// Overrides the Shasta activation timestamp.
    pub shasta_fork_timestamp: Option<u64>,
    #[arg(long, require_equals = true)]
    /// Overrides the L1 beacon genesis time.
    pub l1_genesis_time: Option<u64>,
}

impl DriverConfigOpt {
    /// Read a partial driver config from a file.
    pub fn from_file<T>(path: T) -> DriverResult<Self>
    where
        T: AsRef<Path>,
    {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config: Value = serde_json::from_reader(reader)?;
        Self::deserialize(&config).map_err(|e| e.into())
    }

    /// Merge a partial config into the current one, values set in `other` win.
    pub fn merge(&mut self, other: &Value) -> DriverResult<()> {
        let mut this = serde_json::to_value(&self)?;
        merge(&mut this, other);
        *self = serde_json::from_value(this)?;
        Ok(())
    }
}

/// A complete driver config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverConfig {
    pub l1_rpc: String,
    pub l1_beacon_rpc: String,
    pub l2_rpc: String,
    pub l2_engine: String,
    /// The protocol parameters, with overrides applied.
    pub spec: ProtocolSpec,
}

impl TryFrom<DriverConfigOpt> for DriverConfig {
    type Error = DriverError;

    fn try_from(value: DriverConfigOpt) -> Result<Self, Self::Error> {
        let required = |field: Option<String>, name: &str| {
            field.ok_or_else(|| DriverError::InvalidConfig(format!("Missing {name}")))
        };
        let network = value.network.as_deref().unwrap_or("taiko_mainnet");
        let mut spec = Network::from_str(network)
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?
            .spec()
            .clone();
        if let Some(anchor_address) = value.anchor_address {
            spec.anchor_address = anchor_address;
        }
        if let Some(inbox_address) = value.inbox_address {
            spec.inbox_address = inbox_address;
        }
        if let Some(timestamp) = value.shasta_fork_timestamp {
            spec.forks.insert(
                taiko_driver_lib::consts::Fork::Shasta,
                taiko_driver_lib::consts::ForkCondition::Timestamp(timestamp),
            );
        }
        if let Some(genesis) = value.l1_genesis_time {
            spec.l1_genesis_time = genesis;
        }

        Ok(DriverConfig {
            l1_rpc: required(value.l1_rpc, "l1_rpc")?,
            l1_beacon_rpc: required(value.l1_beacon_rpc, "l1_beacon_rpc")?,
            l2_rpc: required(value.l2_rpc, "l2_rpc")?,
            l2_engine: required(value.l2_engine, "l2_engine")?,
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use taiko_driver_lib::consts::{Fork, ForkCondition, TAIKO_HEKLA_SPEC};

    fn base() -> DriverConfigOpt {
        DriverConfigOpt {
            l1_rpc: Some("http://l1:8545".to_owned()),
            l1_beacon_rpc: Some("http://beacon:5052".to_owned()),
            l2_rpc: Some("http://l2:8545".to_owned()),
            l2_engine: Some("http://l2:8551".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn merge_keeps_unset_fields() {
        let mut opts = base();
        opts.merge(&json!({ "network": "taiko_hekla", "l2_rpc": null }))
            .unwrap();
        assert_eq!(opts.network.as_deref(), Some("taiko_hekla"));
        assert_eq!(opts.l2_rpc.as_deref(), Some("http://l2:8545"));
    }

    #[test]
    fn resolves_network_with_overrides() {
        let mut opts = base();
        opts.network = Some("taiko_hekla".to_owned());
        opts.shasta_fork_timestamp = Some(1_700_000_000);
        let config = DriverConfig::try_from(opts).unwrap();
        assert_eq!(config.spec.chain_id, TAIKO_HEKLA_SPEC.chain_id);
        assert_eq!(config.spec.anchor_address, TAIKO_HEKLA_SPEC.anchor_address);
        assert_eq!(
            config.spec.forks.get(&Fork::Shasta),
            Some(&ForkCondition::Timestamp(1_700_000_000))
        );
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let mut opts = base();
        opts.l2_engine = None;
        assert!(matches!(
            DriverConfig::try_from(opts),
            Err(DriverError::InvalidConfig(msg)) if msg.contains("l2_engine")
        ));
    }

    #[test]
    fn unknown_network_is_rejected() {
        let mut opts = base();
        opts.network = Some("ethereum".to_owned());
        assert!(DriverConfig::try_from(opts).is_err());
    }

    #[test]
    fn context_keeps_root() {
        let err = DriverError::MissingL1Origin(7)
            .context("block 7")
            .context("batch 3");
        assert!(matches!(err.root(), DriverError::MissingL1Origin(7)));
        assert_eq!(
            err.to_string(),
            "batch 3: block 7: L1 origin not found for block 7"
        );
    }
}

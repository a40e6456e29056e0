use alloy_consensus::TxEnvelope;
use alloy_primitives::Address;
use taiko_driver_lib::{
    anchor::{assemble_anchor_tx, AnchorCall, AnchorTxOptions},
    consts::{ProtocolSpec, GOLDEN_TOUCH_ADDRESS},
    signer::FixedKSigner,
};
use tracing::debug;

use crate::{
    interfaces::{DriverResult, DriverResultExt},
    provider::{BlockHeader, ExecutionEngine},
};

/// Builds the signed anchor transaction that opens every L2 block.
#[derive(Debug, Clone)]
pub struct AnchorTxConstructor {
    signer: FixedKSigner,
    chain_id: u64,
    anchor_address: Address,
}

impl AnchorTxConstructor {
    pub fn new(spec: &ProtocolSpec) -> DriverResult<Self> {
        Ok(Self {
            signer: FixedKSigner::golden_touch()?,
            chain_id: spec.chain_id(),
            anchor_address: spec.anchor_address,
        })
    }

    /// The anchor for the child of `parent`, with the golden touch nonce read
    /// at `parent`.
    pub async fn assemble<E: ExecutionEngine>(
        &self,
        engine: &E,
        parent: &BlockHeader,
        call: AnchorCall,
        base_fee: u128,
    ) -> DriverResult<TxEnvelope> {
        let nonce = engine
            .account_nonce_at(GOLDEN_TOUCH_ADDRESS, parent.hash)
            .await
            .context_with(|| format!("golden touch nonce at block {}", parent.number()))?;
        debug!(
            "assembling {} for block {} with nonce {nonce}",
            call.name(),
            parent.number() + 1
        );
        let tx = assemble_anchor_tx(
            &self.signer,
            &call,
            &AnchorTxOptions {
                chain_id: self.chain_id,
                nonce,
                base_fee,
                anchor_address: self.anchor_address,
            },
        )?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mem::MemEngine;
    use alloy_consensus::Transaction;
    use alloy_primitives::{aliases::U48, B256};
    use taiko_driver_lib::{
        consts::TAIKO_MAINNET_SPEC,
        input::shasta::{anchorV4Call, Checkpoint},
    };

    #[tokio::test]
    async fn nonce_comes_from_parent_state() {
        let engine = MemEngine::with_genesis(30_000_000, 0);
        let genesis = engine.head_header().await.unwrap();
        let constructor = AnchorTxConstructor::new(&TAIKO_MAINNET_SPEC).unwrap();
        let call = anchorV4Call {
            _checkpoint: Checkpoint {
                blockNumber: U48::from(10u64),
                blockHash: B256::repeat_byte(1),
                stateRoot: B256::repeat_byte(2),
            },
        };

        let tx = constructor
            .assemble(&engine, &genesis, call.into(), 25_000_000)
            .await
            .unwrap();
        assert_eq!(tx.nonce(), 0);
        assert_eq!(tx.max_fee_per_gas(), 25_000_000);
        assert_eq!(tx.to(), Some(TAIKO_MAINNET_SPEC.anchor_address));
    }

    #[tokio::test]
    async fn unknown_parent_fails() {
        let engine = MemEngine::with_genesis(30_000_000, 0);
        let constructor = AnchorTxConstructor::new(&TAIKO_MAINNET_SPEC).unwrap();
        let call = anchorV4Call {
            _checkpoint: Checkpoint::default(),
        };
        let err = constructor
            .assemble(&engine, &BlockHeader::default(), call.into(), 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("golden touch nonce at block 0"));
    }
}

//! Anchor transaction assembly.
//!
//! Every L2 block starts with a call from the golden touch account into the
//! anchor contract. Its calldata depends on the fork; its signature comes
//! from [FixedKSigner] so that all nodes agree on the block hash.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_sol_types::SolCall;
use tracing::debug;

use crate::{
    consts::{ANCHOR_V2_GAS_LIMIT, ANCHOR_V3_V4_GAS_LIMIT},
    input::{ontake::anchorV2Call, pacaya::anchorV3Call, shasta::anchorV4Call},
    signer::{FixedKSigner, SignerError},
};

/// The fork specific anchor call.
#[derive(Debug, Clone)]
pub enum AnchorCall {
    V2(anchorV2Call),
    V3(anchorV3Call),
    V4(anchorV4Call),
}

impl AnchorCall {
    pub fn gas_limit(&self) -> u64 {
        match self {
            AnchorCall::V2(_) => ANCHOR_V2_GAS_LIMIT,
            AnchorCall::V3(_) | AnchorCall::V4(_) => ANCHOR_V3_V4_GAS_LIMIT,
        }
    }

    pub fn abi_encode(&self) -> Bytes {
        match self {
            AnchorCall::V2(call) => call.abi_encode(),
            AnchorCall::V3(call) => call.abi_encode(),
            AnchorCall::V4(call) => call.abi_encode(),
        }
        .into()
    }

    pub fn name(&self) -> &'static str {
        match self {
            AnchorCall::V2(_) => anchorV2Call::SIGNATURE,
            AnchorCall::V3(_) => anchorV3Call::SIGNATURE,
            AnchorCall::V4(_) => anchorV4Call::SIGNATURE,
        }
    }
}

impl From<anchorV2Call> for AnchorCall {
    fn from(call: anchorV2Call) -> Self {
        AnchorCall::V2(call)
    }
}

impl From<anchorV3Call> for AnchorCall {
    fn from(call: anchorV3Call) -> Self {
        AnchorCall::V3(call)
    }
}

impl From<anchorV4Call> for AnchorCall {
    fn from(call: anchorV4Call) -> Self {
        AnchorCall::V4(call)
    }
}

/// Transaction fields that do not come from the call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorTxOptions {
    pub chain_id: u64,
    /// Golden touch nonce at the parent block.
    pub nonce: u64,
    /// The block's base fee, used as the fee cap.
    pub base_fee: u128,
    pub anchor_address: Address,
}

/// Builds and signs the anchor transaction. Nothing is broadcast.
pub fn assemble_anchor_tx(
    signer: &FixedKSigner,
    call: &AnchorCall,
    options: &AnchorTxOptions,
) -> Result<TxEnvelope, SignerError> {
    let tx = TxEip1559 {
        chain_id: options.chain_id,
        nonce: options.nonce,
        gas_limit: call.gas_limit(),
        max_fee_per_gas: options.base_fee,
        max_priority_fee_per_gas: 0,
        to: TxKind::Call(options.anchor_address),
        value: U256::ZERO,
        access_list: Default::default(),
        input: call.abi_encode(),
    };
    let signature = signer.sign_hash(&tx.signature_hash())?;
    let signed = tx.into_signed(signature);
    debug!(
        "assembled {} tx {} with nonce {}",
        call.name(),
        signed.hash(),
        options.nonce
    );
    Ok(signed.into())
}

#[cfg(test)]
mod tests {
    use alloy_consensus::Transaction;
    use alloy_primitives::{aliases::U48, B256};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        consts::GOLDEN_TOUCH_ADDRESS,
        input::{ontake, pacaya, shasta::Checkpoint},
    };

    fn options() -> AnchorTxOptions {
        AnchorTxOptions {
            chain_id: 167001,
            nonce: 7,
            base_fee: 25_000_000,
            anchor_address: Address::repeat_byte(0x16),
        }
    }

    fn v4_call() -> AnchorCall {
        anchorV4Call {
            _checkpoint: Checkpoint {
                blockNumber: U48::from(1234u64),
                blockHash: B256::repeat_byte(1),
                stateRoot: B256::repeat_byte(2),
            },
        }
        .into()
    }

    #[test]
    fn anchor_tx_is_signed_by_golden_touch() {
        let signer = FixedKSigner::golden_touch().unwrap();
        let tx = assemble_anchor_tx(&signer, &v4_call(), &options()).unwrap();

        assert_eq!(tx.recover_signer().unwrap(), GOLDEN_TOUCH_ADDRESS);
        assert_eq!(tx.nonce(), 7);
        assert_eq!(tx.gas_limit(), ANCHOR_V3_V4_GAS_LIMIT);
        assert_eq!(tx.max_fee_per_gas(), 25_000_000);
        assert_eq!(tx.max_priority_fee_per_gas(), Some(0));
        assert_eq!(tx.to(), Some(Address::repeat_byte(0x16)));
        assert_eq!(tx.chain_id(), Some(167001));

        let decoded = anchorV4Call::abi_decode(tx.input(), true).unwrap();
        assert_eq!(decoded._checkpoint.blockNumber, U48::from(1234u64));
    }

    #[test]
    fn anchor_tx_is_deterministic() {
        let signer = FixedKSigner::golden_touch().unwrap();
        let first = assemble_anchor_tx(&signer, &v4_call(), &options()).unwrap();
        let second = assemble_anchor_tx(&signer, &v4_call(), &options()).unwrap();
        assert_eq!(first.tx_hash(), second.tx_hash());

        let mut other = options();
        other.nonce += 1;
        let third = assemble_anchor_tx(&signer, &v4_call(), &other).unwrap();
        assert_ne!(first.tx_hash(), third.tx_hash());
    }

    #[test]
    fn gas_limit_per_fork() {
        let v2: AnchorCall = anchorV2Call {
            _anchorBlockId: 1,
            _anchorStateRoot: B256::ZERO,
            _parentGasUsed: 0,
            _baseFeeConfig: ontake::BaseFeeConfig::default(),
        }
        .into();
        let v3: AnchorCall = anchorV3Call {
            _anchorBlockId: 1,
            _anchorStateRoot: B256::ZERO,
            _parentGasUsed: 0,
            _baseFeeConfig: pacaya::BaseFeeConfig::default(),
            _signalSlots: vec![B256::repeat_byte(9)],
        }
        .into();
        assert_eq!(v2.gas_limit(), ANCHOR_V2_GAS_LIMIT);
        assert_eq!(v3.gas_limit(), ANCHOR_V3_V4_GAS_LIMIT);
        assert_eq!(&v3.abi_encode()[..4], &anchorV3Call::SELECTOR[..]);
        assert!(v2.name().starts_with("anchorV2("));
    }
}

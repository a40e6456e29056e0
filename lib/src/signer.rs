//! Deterministic ECDSA signing for anchor transactions.
//!
//! Anchor transactions must be signed by the golden touch key with a fixed
//! nonce `k`, so that every node produces byte-identical blocks. `k = 1` is
//! tried first, then `k = 2`.

use alloy_primitives::{Address, PrimitiveSignature, B256, U256};
use k256::{
    elliptic_curve::{
        ff::PrimeField, ops::Reduce, point::AffineCoordinates, scalar::IsHigh,
        sec1::ToEncodedPoint,
    },
    FieldBytes, ProjectivePoint, Scalar, U256 as ScalarUint,
};
use tracing::trace;

use crate::consts::GOLDEN_TOUCH_PRIVATE_KEY;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("hash must be 32 bytes, got {0}")]
    InvalidHashLength(usize),
    #[error("signing nonce is not invertible")]
    NonInvertibleScalar,
    #[error("signature component is zero")]
    ZeroSignatureComponent,
    #[error("no fixed nonce produced a valid signature")]
    SigningFailed,
}

/// A signature together with its go-ethereum style recovery id (`0..=3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedKSignature {
    pub signature: PrimitiveSignature,
    pub recovery_id: u8,
}

#[derive(Debug, Clone)]
pub struct FixedKSigner {
    secret: Scalar,
    address: Address,
}

impl FixedKSigner {
    /// Parses a hex private key, `0x` prefix optional.
    pub fn new(private_key: &str) -> Result<Self, SignerError> {
        let raw = hex::decode(private_key.trim_start_matches("0x"))
            .map_err(|_| SignerError::InvalidPrivateKey)?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| SignerError::InvalidPrivateKey)?;
        let secret = Option::<Scalar>::from(Scalar::from_repr(bytes.into()))
            .ok_or(SignerError::InvalidPrivateKey)?;
        if bool::from(secret.is_zero()) {
            return Err(SignerError::InvalidPrivateKey);
        }

        let public = (ProjectivePoint::GENERATOR * secret)
            .to_affine()
            .to_encoded_point(false);
        let address = Address::from_raw_public_key(&public.as_bytes()[1..]);
        Ok(Self { secret, address })
    }

    pub fn golden_touch() -> Result<Self, SignerError> {
        Self::new(GOLDEN_TOUCH_PRIVATE_KEY)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a 32-byte digest, trying `k = 1` then `k = 2`.
    pub fn sign(&self, hash: &[u8]) -> Result<FixedKSignature, SignerError> {
        let hash: &[u8; 32] = hash
            .try_into()
            .map_err(|_| SignerError::InvalidHashLength(hash.len()))?;
        for k in [1u64, 2] {
            match self.sign_with_specific_k(k, hash) {
                Ok(signature) => return Ok(signature),
                Err(e) => trace!("fixed k={k} rejected: {e}"),
            }
        }
        Err(SignerError::SigningFailed)
    }

    pub fn sign_hash(&self, hash: &B256) -> Result<PrimitiveSignature, SignerError> {
        Ok(self.sign(hash.as_slice())?.signature)
    }

    /// One signing attempt with the given nonce.
    pub fn sign_with_specific_k(
        &self,
        k: u64,
        hash: &[u8; 32],
    ) -> Result<FixedKSignature, SignerError> {
        let k = Scalar::from(k);
        let point = (ProjectivePoint::GENERATOR * k).to_affine();
        let x = point.x();

        // r = R.x mod n, remembering whether the reduction wrapped
        let canonical = Option::<Scalar>::from(Scalar::from_repr(x));
        let overflow = canonical.is_none();
        let r = canonical.unwrap_or_else(|| <Scalar as Reduce<ScalarUint>>::reduce_bytes(&x));

        let k_inv = Option::<Scalar>::from(k.invert()).ok_or(SignerError::NonInvertibleScalar)?;
        let digest: FieldBytes = (*hash).into();
        let e = <Scalar as Reduce<ScalarUint>>::reduce_bytes(&digest);
        let mut s = k_inv * (e + r * self.secret);
        if bool::from(s.is_zero()) || bool::from(r.is_zero()) {
            return Err(SignerError::ZeroSignatureComponent);
        }

        let mut recovery_id = ((overflow as u8) << 1) | bool::from(point.y_is_odd()) as u8;
        if bool::from(s.is_high()) {
            s = -s;
            recovery_id ^= 1;
        }

        Ok(FixedKSignature {
            signature: PrimitiveSignature::new(
                U256::from_be_slice(&r.to_bytes()),
                U256::from_be_slice(&s.to_bytes()),
                recovery_id & 1 == 1,
            ),
            recovery_id,
        })
    }
}

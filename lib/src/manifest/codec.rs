use alloy_primitives::U256;
use anyhow::Result;
use tracing::warn;

use super::types::{DerivationSourceManifest, ProposalManifest};
use crate::{
    consts::{
        BLOCK_MAX_RAW_TRANSACTIONS, MAX_DECOMPRESSION_FACTOR, PROPOSAL_MAX_BLOCKS,
        PROPOSAL_MAX_BYTES, SHASTA_PAYLOAD_VERSION,
    },
    utils::{zlib_compress_data, zlib_decompress_bounded},
    RlpBytes,
};

/// A 32-byte version word followed by a 32-byte size word.
pub const MANIFEST_HEADER_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest header needs {need} bytes at offset {offset}, only {len} available")]
    ShortHeader {
        need: usize,
        offset: usize,
        len: usize,
    },
    #[error("manifest {0} does not fit in 64 bits")]
    WordOverflow(&'static str),
}

fn read_word(
    bytes: &[u8],
    offset: usize,
    skip: usize,
    field: &'static str,
) -> Result<u64, ManifestError> {
    let start = offset.checked_add(skip);
    let word = start
        .and_then(|start| bytes.get(start..start.checked_add(32)?))
        .ok_or(ManifestError::ShortHeader {
            need: skip + 32,
            offset,
            len: bytes.len().saturating_sub(offset),
        })?;
    let value = U256::from_be_slice(word);
    if value > U256::from(u64::MAX) {
        return Err(ManifestError::WordOverflow(field));
    }
    Ok(value.to::<u64>())
}

/// Reads the manifest version word at `offset`.
pub fn extract_version(bytes: &[u8], offset: usize) -> Result<u64, ManifestError> {
    read_word(bytes, offset, 0, "version")
}

/// Reads the compressed payload size word following the version.
pub fn extract_size(bytes: &[u8], offset: usize) -> Result<u64, ManifestError> {
    read_word(bytes, offset, 32, "size")
}

pub fn extract_version_and_size(bytes: &[u8], offset: usize) -> Result<(u64, u64), ManifestError> {
    Ok((extract_version(bytes, offset)?, extract_size(bytes, offset)?))
}

/// Decodes the manifest found at `offset` of the concatenated blob data.
///
/// Never fails: any framing, decompression, decoding or budget problem yields
/// [ProposalManifest::default].
pub fn try_decompress_manifest(bytes: &[u8], offset: usize) -> ProposalManifest {
    match decompress_manifest(bytes, offset) {
        Ok(manifest) => manifest.into(),
        Err(e) => {
            warn!("using default manifest at offset {offset}: {e}");
            ProposalManifest::default()
        }
    }
}

fn decompress_manifest(bytes: &[u8], offset: usize) -> Result<DerivationSourceManifest> {
    let (version, size) = extract_version_and_size(bytes, offset)?;
    anyhow::ensure!(
        version == SHASTA_PAYLOAD_VERSION,
        "unsupported manifest version {version}"
    );
    anyhow::ensure!(
        size <= PROPOSAL_MAX_BYTES as u64,
        "manifest size {size} exceeds {PROPOSAL_MAX_BYTES}"
    );

    let start = offset + MANIFEST_HEADER_BYTES;
    let compressed = bytes
        .get(start..start + size as usize)
        .ok_or_else(|| anyhow::anyhow!("manifest needs {size} bytes at {start}"))?;
    let encoded =
        zlib_decompress_bounded(compressed, PROPOSAL_MAX_BYTES * MAX_DECOMPRESSION_FACTOR)?;
    let manifest = DerivationSourceManifest::decode_bytes(&encoded)?;

    anyhow::ensure!(
        manifest.blocks.len() <= PROPOSAL_MAX_BLOCKS,
        "manifest has {} blocks, max {PROPOSAL_MAX_BLOCKS}",
        manifest.blocks.len()
    );
    if let Some((index, block)) = manifest
        .blocks
        .iter()
        .enumerate()
        .find(|(_, block)| block.transactions.len() > BLOCK_MAX_RAW_TRANSACTIONS)
    {
        anyhow::bail!(
            "manifest block {index} has {} transactions, max {BLOCK_MAX_RAW_TRANSACTIONS}",
            block.transactions.len()
        );
    }
    Ok(manifest)
}

/// Frames a manifest the way proposers publish it: version, size, then zlib(rlp(manifest)).
pub fn encode_manifest_payload(manifest: &DerivationSourceManifest) -> Result<Vec<u8>> {
    let compressed = zlib_compress_data(&alloy_rlp::encode(manifest))?;
    let mut out = Vec::with_capacity(MANIFEST_HEADER_BYTES + compressed.len());
    out.extend_from_slice(&U256::from(SHASTA_PAYLOAD_VERSION).to_be_bytes::<32>());
    out.extend_from_slice(&U256::from(compressed.len()).to_be_bytes::<32>());
    out.extend_from_slice(&compressed);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use alloy_consensus::{Signed, TxEnvelope, TxLegacy};
    use alloy_primitives::{Address, PrimitiveSignature, TxKind, B256};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::manifest::BlockManifest;

    fn legacy_tx(nonce: u64) -> TxEnvelope {
        let tx = TxLegacy {
            chain_id: Some(167001),
            nonce,
            gas_price: 10,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0xaa)),
            ..Default::default()
        };
        let signature = PrimitiveSignature::new(
            alloy_primitives::U256::from(1u64),
            alloy_primitives::U256::from(2u64),
            false,
        );
        TxEnvelope::Legacy(Signed::new_unchecked(tx, signature, B256::ZERO))
    }

    fn sample_manifest() -> DerivationSourceManifest {
        DerivationSourceManifest {
            blocks: vec![
                BlockManifest {
                    timestamp: 1_700_000_000,
                    coinbase: Address::repeat_byte(0x12),
                    anchor_block_number: 100,
                    gas_limit: 30_000_000,
                    transactions: vec![legacy_tx(0), legacy_tx(1)],
                },
                BlockManifest {
                    timestamp: 1_700_000_002,
                    coinbase: Address::repeat_byte(0x98),
                    anchor_block_number: 0,
                    gas_limit: 0,
                    transactions: vec![],
                },
            ],
        }
    }

    fn with_offset(payload: &[u8], offset: usize) -> Vec<u8> {
        let mut bytes = vec![0xffu8; offset];
        bytes.extend_from_slice(payload);
        bytes
    }

    #[rstest]
    #[case(0)]
    #[case(31)]
    #[case(4096)]
    fn decodes_framed_manifest(#[case] offset: usize) {
        let manifest = sample_manifest();
        let bytes = with_offset(&encode_manifest_payload(&manifest).unwrap(), offset);

        let decoded = try_decompress_manifest(&bytes, offset);
        assert!(!decoded.default);
        assert_eq!(decoded.blocks.len(), 2);
        assert_eq!(decoded.blocks[0].transactions.len(), 2);
        // tx hashes are recomputed on decode
        assert_eq!(decoded.blocks[1], manifest.blocks[1]);
        assert_eq!(decoded.blocks[0].coinbase, manifest.blocks[0].coinbase);
    }

    #[test]
    fn header_words() {
        let payload = encode_manifest_payload(&sample_manifest()).unwrap();
        let (version, size) = extract_version_and_size(&payload, 0).unwrap();
        assert_eq!(version, SHASTA_PAYLOAD_VERSION);
        assert_eq!(size as usize, payload.len() - MANIFEST_HEADER_BYTES);
        assert_eq!(extract_version(&payload, 0).unwrap(), version);
        assert_eq!(extract_size(&payload, 0).unwrap(), size);
    }

    #[test]
    fn header_errors() {
        assert_eq!(
            extract_version(&[0u8; 31], 0),
            Err(ManifestError::ShortHeader {
                need: 32,
                offset: 0,
                len: 31
            })
        );
        assert_eq!(
            extract_size(&[0u8; 40], 0),
            Err(ManifestError::ShortHeader {
                need: 64,
                offset: 0,
                len: 40
            })
        );
        assert!(matches!(
            extract_version(&[0u8; 10], usize::MAX),
            Err(ManifestError::ShortHeader { .. })
        ));
        assert_eq!(
            extract_version(&[0xffu8; 32], 0),
            Err(ManifestError::WordOverflow("version"))
        );
    }

    fn over_budget_blocks() -> Vec<u8> {
        let manifest = DerivationSourceManifest {
            blocks: vec![BlockManifest::default(); PROPOSAL_MAX_BLOCKS + 1],
        };
        encode_manifest_payload(&manifest).unwrap()
    }

    fn over_budget_txs() -> Vec<u8> {
        let manifest = DerivationSourceManifest {
            blocks: vec![BlockManifest {
                transactions: vec![legacy_tx(0); BLOCK_MAX_RAW_TRANSACTIONS + 1],
                ..Default::default()
            }],
        };
        encode_manifest_payload(&manifest).unwrap()
    }

    fn rewrite_word(mut payload: Vec<u8>, at: usize, value: U256) -> Vec<u8> {
        payload[at..at + 32].copy_from_slice(&value.to_be_bytes::<32>());
        payload
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::short_header(vec![0u8; 63])]
    #[case::truncated({
        let mut payload = encode_manifest_payload(&sample_manifest()).unwrap();
        payload.truncate(payload.len() - 1);
        payload
    })]
    #[case::wrong_version(rewrite_word(
        encode_manifest_payload(&sample_manifest()).unwrap(),
        0,
        U256::from(2)
    ))]
    #[case::oversized(rewrite_word(
        encode_manifest_payload(&sample_manifest()).unwrap(),
        32,
        U256::from(PROPOSAL_MAX_BYTES + 1)
    ))]
    #[case::not_zlib({
        let mut payload = U256::from(1).to_be_bytes::<32>().to_vec();
        payload.extend_from_slice(&U256::from(4).to_be_bytes::<32>());
        payload.extend_from_slice(&[1, 2, 3, 4]);
        payload
    })]
    #[case::not_rlp({
        let compressed = zlib_compress_data(&[0xc5, 0x01]).unwrap();
        let mut payload = U256::from(1).to_be_bytes::<32>().to_vec();
        payload.extend_from_slice(&U256::from(compressed.len()).to_be_bytes::<32>());
        payload.extend_from_slice(&compressed);
        payload
    })]
    #[case::too_many_blocks(over_budget_blocks())]
    #[case::too_many_transactions(over_budget_txs())]
    fn falls_back_to_default(#[case] bytes: Vec<u8>) {
        let manifest = try_decompress_manifest(&bytes, 0);
        assert_eq!(manifest, ProposalManifest::default());
        assert_eq!(manifest.blocks, vec![BlockManifest::default()]);
    }

    #[test]
    fn inflation_is_bounded() {
        let inflated = vec![0u8; PROPOSAL_MAX_BYTES * MAX_DECOMPRESSION_FACTOR + 1];
        let compressed = zlib_compress_data(&inflated).unwrap();
        let mut payload = U256::from(1).to_be_bytes::<32>().to_vec();
        payload.extend_from_slice(&U256::from(compressed.len()).to_be_bytes::<32>());
        payload.extend_from_slice(&compressed);

        let err = decompress_manifest(&payload, 0).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");
        assert_eq!(try_decompress_manifest(&payload, 0), ProposalManifest::default());
    }
}

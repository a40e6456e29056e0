//! Shasta derivation source manifests: payload framing, decoding and validation.

mod codec;
mod types;
mod validation;

pub use codec::{
    encode_manifest_payload, extract_size, extract_version, extract_version_and_size,
    try_decompress_manifest, ManifestError, MANIFEST_HEADER_BYTES,
};
pub use types::{BlockManifest, DerivationSourceManifest, ProposalManifest};
pub use validation::{
    apply_inherited_metadata, gas_limit_bounds, resolve_source_manifest, timestamp_bounds,
    validate_forced_inclusion_manifest, validate_normal_manifest, ManifestContext,
    ValidationError,
};

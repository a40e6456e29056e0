//! Compact binary codec for the Shasta inbox `Proposed` and `Proved` events.
//!
//! All integers are big-endian and fixed width, addresses are 20 bytes and hashes
//! 32 bytes. Every list is preceded by an explicit `u16` element count.

mod decoder;
mod encoder;

pub use decoder::{decode_proposed_event, decode_proved_event};
pub use encoder::{
    encode_proposed_event, encode_proved_event, encoded_proposed_event_size,
    encoded_proved_event_size,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("insufficient bytes: need {need} at offset {offset}")]
    InsufficientBytes { need: usize, offset: usize },

    #[error("offset overflow")]
    OffsetOverflow,

    #[error("invalid bond type {0} (max {max})", max = crate::consts::MAX_BOND_TYPE)]
    InvalidBondType(u8),

    #[error("unexpected trailing bytes: {0} left")]
    TrailingBytes(usize),

    #[error("{field} has {len} elements, more than a u16 count allows")]
    CountOverflow { field: &'static str, len: usize },
}

pub type CodecResult<T> = Result<T, CodecError>;

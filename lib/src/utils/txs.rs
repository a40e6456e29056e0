// utils fns for tx list processing.
use alloy_consensus::TxEnvelope;
use alloy_rlp::Decodable;
use tracing::{debug, warn};

use crate::{consts::MAX_DECOMPRESSION_FACTOR, utils::zlib_decompress_bounded};

pub fn decode_transactions(tx_list: &[u8]) -> Vec<TxEnvelope> {
    #[allow(clippy::useless_asref)]
    Vec::<TxEnvelope>::decode(&mut tx_list.as_ref()).unwrap_or_else(|e| {
        // If decoding fails we need to make an empty block
        warn!("decode_transactions not successful: {e:?}, use empty tx_list");
        vec![]
    })
}

/// Turns the compressed tx list published on L1 into transactions.
///
/// Invalid lists are not an error: the block is still built, just empty.
#[derive(Debug, Clone, Copy)]
pub struct TxListDecompressor {
    max_bytes_per_tx_list: usize,
}

impl TxListDecompressor {
    pub fn new(max_bytes_per_tx_list: usize) -> Self {
        Self {
            max_bytes_per_tx_list,
        }
    }

    pub fn try_decompress(&self, compressed: &[u8], blob_used: bool) -> Vec<TxEnvelope> {
        debug!(
            "try_decompress(blob_used: {blob_used}, compressed.len: {})",
            compressed.len()
        );
        if compressed.len() > self.max_bytes_per_tx_list {
            warn!(
                "compressed tx list too large: {} > {}, use empty tx_list",
                compressed.len(),
                self.max_bytes_per_tx_list
            );
            return vec![];
        }
        match zlib_decompress_bounded(
            compressed,
            self.max_bytes_per_tx_list * MAX_DECOMPRESSION_FACTOR,
        ) {
            Ok(tx_list) => decode_transactions(&tx_list),
            Err(e) => {
                warn!("failed to decompress tx list: {e}, use empty tx_list");
                vec![]
            }
        }
    }
}

/// Cuts `[offset, offset + len)` out of the decoded blob data.
pub fn slice_tx_list(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(len)?)
}

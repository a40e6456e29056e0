use anyhow::Result;
use libflate::zlib::{Decoder as ZlibDecoder, Encoder as ZlibEncoder};
use std::io::{Read, Write};

pub mod blob;
pub mod pacaya;
pub mod payload;
pub mod shasta;
pub mod txs;

pub use blob::decode_blob_data;
pub use txs::{decode_transactions, TxListDecompressor};

/// Inflates at most `limit` bytes, failing if the stream holds more.
pub fn zlib_decompress_bounded(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let decoder = ZlibDecoder::new(data)?;
    let mut decoded_buf = Vec::new();
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded_buf)?;
    anyhow::ensure!(
        decoded_buf.len() <= limit,
        "decompressed data exceeds {limit} bytes"
    );
    Ok(decoded_buf)
}

pub fn zlib_compress_data(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new())?;
    encoder.write_all(data)?;
    Ok(encoder.finish().into_result()?)
}

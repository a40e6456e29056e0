//! Decoding of data packed into EIP-4844 blob field elements.
//!
//! Layout as in <https://github.com/ethereum-optimism/optimism/blob/develop/op-service/eth/blob.go>.
use anyhow::{bail, ensure, Result};

use crate::consts::BLOB_BYTES;

const BLOB_VERSION_OFFSET: usize = 1;
const BLOB_ENCODING_VERSION: u8 = 0;
/// Largest payload a single blob can carry.
pub const MAX_BLOB_DATA_SIZE: usize = (4 * 31 + 3) * 1024 - 4;

pub fn decode_blob_data(blob_buf: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        blob_buf.len() == BLOB_BYTES,
        "blob has {} bytes, expected {BLOB_BYTES}",
        blob_buf.len()
    );
    if blob_buf[BLOB_VERSION_OFFSET] != BLOB_ENCODING_VERSION {
        bail!(
            "unsupported blob encoding version {}",
            blob_buf[BLOB_VERSION_OFFSET]
        );
    }

    // 3-byte big-endian length
    let output_len = (u32::from(blob_buf[2]) << 16
        | u32::from(blob_buf[3]) << 8
        | u32::from(blob_buf[4])) as usize;
    ensure!(
        output_len <= MAX_BLOB_DATA_SIZE,
        "blob data length {output_len} exceeds {MAX_BLOB_DATA_SIZE}"
    );

    // round 0 copies only the remaining 27 bytes of the first field element,
    // version and length occupy the first 5
    let mut output = vec![0u8; MAX_BLOB_DATA_SIZE];
    output[0..27].copy_from_slice(&blob_buf[5..32]);

    let mut opos: usize = 28;
    let mut ipos: usize = 32;
    let mut encoded_byte: [u8; 4] = [0; 4];
    encoded_byte[0] = blob_buf[0];
    for encoded_byte_i in encoded_byte.iter_mut().skip(1) {
        (*encoded_byte_i, opos, ipos) = decode_field_element(blob_buf, opos, ipos, &mut output)?;
    }
    opos = reassemble_bytes(opos, encoded_byte, &mut output);

    // each remaining round turns 4 field elements (128 bytes) into 127 bytes
    for _ in 1..1024 {
        if opos < output_len {
            for encoded_byte_j in &mut encoded_byte {
                (*encoded_byte_j, opos, ipos) =
                    decode_field_element(blob_buf, opos, ipos, &mut output)?;
            }
            opos = reassemble_bytes(opos, encoded_byte, &mut output);
        }
    }
    if output.iter().skip(output_len).any(|b| *b != 0) {
        bail!("non-zero bytes after blob data length {output_len}");
    }
    if blob_buf.iter().skip(ipos).any(|b| *b != 0) {
        bail!("non-zero blob bytes after position {ipos}");
    }
    output.truncate(output_len);
    Ok(output)
}

fn decode_field_element(
    b: &[u8],
    opos: usize,
    ipos: usize,
    output: &mut [u8],
) -> Result<(u8, usize, usize)> {
    // the two highest bits of each field element are always zero
    if b[ipos] & 0b1100_0000 != 0 {
        bail!("invalid field element at {ipos}");
    }
    output[opos..opos + 31].copy_from_slice(&b[ipos + 1..ipos + 32]);
    Ok((b[ipos], opos + 32, ipos + 32))
}

fn reassemble_bytes(opos: usize, encoded_byte: [u8; 4], output: &mut [u8]) -> usize {
    // no 128th byte is written
    let opos = opos - 1;
    let x = (encoded_byte[0] & 0b0011_1111) | ((encoded_byte[1] & 0b0011_0000) << 2);
    let y = (encoded_byte[1] & 0b0000_1111) | ((encoded_byte[3] & 0b0000_1111) << 4);
    let z = (encoded_byte[2] & 0b0011_1111) | ((encoded_byte[3] & 0b0011_0000) << 2);
    output[opos - 32] = z;
    output[opos - (32 * 2)] = y;
    output[opos - (32 * 3)] = x;
    opos
}

/// Packs `data` into a blob. Inverse of [decode_blob_data], used to build fixtures.
pub fn encode_blob_data(data: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        data.len() <= MAX_BLOB_DATA_SIZE,
        "data length {} exceeds {MAX_BLOB_DATA_SIZE}",
        data.len()
    );
    let mut blob = vec![0u8; BLOB_BYTES];
    let mut read = 0usize;
    let next = |read: &mut usize, out: &mut [u8]| {
        for slot in out.iter_mut() {
            *slot = data.get(*read).copied().unwrap_or_default();
            *read += 1;
        }
    };

    let mut opos = 0usize;
    for round in 0..1024 {
        if round > 0 && read >= data.len() {
            break;
        }
        let mut x = [0u8; 1];
        let mut y = [0u8; 1];
        let mut z = [0u8; 1];

        // field element 0
        let base = opos;
        if round == 0 {
            blob[base + 1] = BLOB_ENCODING_VERSION;
            let len = (data.len() as u32).to_be_bytes();
            blob[base + 2..base + 5].copy_from_slice(&len[1..]);
            next(&mut read, &mut blob[base + 5..base + 32]);
        } else {
            next(&mut read, &mut blob[base + 1..base + 32]);
        }
        next(&mut read, &mut x);
        blob[base] = x[0] & 0b0011_1111;

        // field element 1
        let base = opos + 32;
        next(&mut read, &mut blob[base + 1..base + 32]);
        next(&mut read, &mut y);
        blob[base] = (y[0] & 0b0000_1111) | ((x[0] & 0b1100_0000) >> 2);

        // field element 2
        let base = opos + 64;
        next(&mut read, &mut blob[base + 1..base + 32]);
        next(&mut read, &mut z);
        blob[base] = z[0] & 0b0011_1111;

        // field element 3
        let base = opos + 96;
        next(&mut read, &mut blob[base + 1..base + 32]);
        blob[base] = ((z[0] & 0b1100_0000) >> 2) | ((y[0] & 0b1111_0000) >> 4);

        opos += 128;
    }
    Ok(blob)
}

//! LZ4 raw block compression

use crate::error::{Error, Result};

/// Compress data as a single LZ4 block (no size prefix, no frame).
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress(data)
}

/// Decompress a single LZ4 block whose decompressed size is known.
///
/// # Errors
/// Returns [`Error::CorruptData`] if the block is malformed or decodes to a
/// different length than `expected_size`.
pub fn decompress(compressed: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    // A block cannot expand more than 255:1, so reject impossible sizes before allocating
    if expected_size > compressed.len().saturating_mul(255).saturating_add(64) {
        return Err(Error::corrupt(format!(
            "{} compressed bytes cannot decode to {expected_size} bytes",
            compressed.len()
        )));
    }

    let data = lz4_flex::block::decompress(compressed, expected_size).map_err(|e| {
        Error::corrupt(format!(
            "LZ4 block decode failed ({} compressed bytes, {expected_size} expected): {e}",
            compressed.len()
        ))
    })?;

    if data.len() != expected_size {
        return Err(Error::corrupt(format!(
            "LZ4 block decoded to {} bytes, expected {expected_size}",
            data.len()
        )));
    }

    Ok(data)
}

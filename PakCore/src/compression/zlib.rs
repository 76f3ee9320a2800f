//! Zlib compression

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{Error, Result};

/// Compress data into a zlib stream.
///
/// `fast` selects level 1, otherwise level 9 is used.
pub fn compress(data: &[u8], fast: bool) -> Result<Vec<u8>> {
    let level = if fast {
        Compression::fast()
    } else {
        Compression::best()
    };
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a zlib stream whose decompressed size is known.
///
/// # Errors
/// Returns [`Error::CorruptData`] if the stream is malformed or its length
/// differs from `expected_size`.
pub fn decompress(compressed: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    // Deflate tops out at roughly 1032:1
    if expected_size > compressed.len().saturating_mul(1032).saturating_add(64) {
        return Err(Error::corrupt(format!(
            "{} compressed bytes cannot inflate to {expected_size} bytes",
            compressed.len()
        )));
    }

    // Read at most one byte past the expected size so oversized streams are
    // detected without inflating them completely.
    let mut decoder = ZlibDecoder::new(compressed).take(expected_size as u64 + 1);
    let mut decompressed = Vec::with_capacity(expected_size);

    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::corrupt(format!("Zlib stream decode failed: {e}")))?;

    if decompressed.len() != expected_size {
        return Err(Error::corrupt(format!(
            "Zlib stream decoded to {}{} bytes, expected {expected_size}",
            if decompressed.len() > expected_size { "more than " } else { "" },
            decompressed.len().min(expected_size)
        )));
    }

    Ok(decompressed)
}

//! Compression utilities
//!
//! The codec layer used for individual entries and for solid blocks. It is
//! stateless and never touches the filesystem.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod lz4;
pub mod zlib;

/// Compression method used for an entry or a solid block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    None,
    Zlib,
    #[default]
    Lz4,
}

impl CompressionMethod {
    /// Parse a compression method from its on-disk id
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Zlib),
            2 => Some(CompressionMethod::Lz4),
            _ => None,
        }
    }

    /// On-disk id of this method
    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Zlib => 1,
            CompressionMethod::Lz4 => 2,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Zlib => "zlib",
            CompressionMethod::Lz4 => "lz4",
        }
    }
}

/// Compress `data` with `method`.
///
/// `fast` trades ratio for speed where the method has levels (zlib); LZ4 has
/// a single level. Empty input always yields empty output.
///
/// # Errors
/// Returns an error if the encoder fails.
pub fn compress(data: &[u8], method: CompressionMethod, fast: bool) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Zlib => zlib::compress(data, fast),
        CompressionMethod::Lz4 => Ok(lz4::compress(data)),
    }
}

/// Decompress `compressed` produced by `method` into exactly `expected_size` bytes.
///
/// # Errors
/// Returns [`Error::CorruptData`] if the stream is malformed or the decoded
/// length differs from `expected_size`.
pub fn decompress(
    compressed: &[u8],
    method: CompressionMethod,
    expected_size: usize,
) -> Result<Vec<u8>> {
    if expected_size == 0 {
        return if compressed.is_empty() {
            Ok(Vec::new())
        } else {
            Err(Error::corrupt(format!(
                "{} stream of {} bytes for an empty entry",
                method.as_str(),
                compressed.len()
            )))
        };
    }

    match method {
        CompressionMethod::None => {
            if compressed.len() != expected_size {
                return Err(Error::corrupt(format!(
                    "stored data is {} bytes, expected {expected_size}",
                    compressed.len()
                )));
            }
            Ok(compressed.to_vec())
        }
        CompressionMethod::Zlib => zlib::decompress(compressed, expected_size),
        CompressionMethod::Lz4 => lz4::decompress(compressed, expected_size),
    }
}

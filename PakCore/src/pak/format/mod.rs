//! Package file format reader/writer
//!
//! Layout (little-endian): a fixed [`HEADER_SIZE`] header, the payload
//! region (stored entries or compressed solid blocks), then the index.
//! The header records where the index starts, its size and its CRC-32.

mod reader;
mod types;
mod writer;

pub use reader::PakReader;
pub(crate) use reader::slice_solid_entry;
pub use types::*;
pub use writer::PakWriter;

/// Package magic bytes
pub const MAGIC: [u8; 4] = *b"LPAK";

/// Minimum supported package version
pub const MIN_VERSION: u32 = 1;

/// Maximum supported package version
pub const MAX_VERSION: u32 = 2;

/// Size of the fixed header
pub const HEADER_SIZE: usize = 36;

/// Size of a solid block record in the index
pub const BLOCK_RECORD_SIZE: usize = 29;

/// Size of an entry record in the index, excluding the path bytes
pub const ENTRY_RECORD_FIXED_SIZE: usize = 39;

/// Block id stored for entries that are not part of a solid block
pub const NO_BLOCK: u32 = u32::MAX;

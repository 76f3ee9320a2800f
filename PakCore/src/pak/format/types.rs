//! Types for package file handling

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

use super::{HEADER_SIZE, MAGIC, MAX_VERSION, MIN_VERSION};
use crate::error::{Error, Result};
use crate::pak::options::{PackageFlags, PackageVersion};

/// Header of a package file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PakHeader {
    /// Format revision
    pub version: PackageVersion,
    /// Package flags
    pub flags: PackageFlags,
    /// Load-order priority
    pub priority: u8,
    /// Number of entries in the index
    pub entry_count: u32,
    /// Number of solid blocks in the index
    pub block_count: u32,
    /// Offset of the index from the start of the file
    pub index_offset: u64,
    /// Size of the index in bytes
    pub index_size: u32,
    /// CRC-32 of the index bytes
    pub index_crc: u32,
}

impl PakHeader {
    /// Serialize the header into exactly [`HEADER_SIZE`] bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut bytes[..]);
        // Writes into a fixed buffer of the right size cannot fail.
        let _ = self.write_fields(&mut cursor);
        bytes
    }

    fn write_fields<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(self.version.as_u32())?;
        writer.write_u8(self.flags.bits())?;
        writer.write_u8(self.priority)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(self.entry_count)?;
        writer.write_u32::<LittleEndian>(self.block_count)?;
        writer.write_u64::<LittleEndian>(self.index_offset)?;
        writer.write_u32::<LittleEndian>(self.index_size)?;
        writer.write_u32::<LittleEndian>(self.index_crc)?;
        Ok(())
    }

    /// Parse a header from the leading bytes of a package.
    ///
    /// The magic and version are checked before anything else so that an
    /// archive from a newer format revision is reported as such even if the
    /// rest of its header differs.
    ///
    /// # Errors
    /// Returns [`Error::MalformedHeader`] for a bad magic, truncation, unknown
    /// flag bits or a non-zero reserved field, and
    /// [`Error::UnsupportedVersion`] for versions outside
    /// [`MIN_VERSION`]..=[`MAX_VERSION`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() {
            return Err(Error::malformed_header(format!(
                "file is {} bytes, too short for the magic",
                bytes.len()
            )));
        }
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::malformed_header(format!(
                "invalid magic {:?}, expected {:?}",
                &bytes[..MAGIC.len()],
                MAGIC
            )));
        }

        let mut cursor = Cursor::new(&bytes[MAGIC.len()..]);
        let truncated = || {
            Error::malformed_header(format!(
                "header truncated: {} of {HEADER_SIZE} bytes present",
                bytes.len()
            ))
        };

        let raw_version = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;
        let version = PackageVersion::from_u32(raw_version).ok_or(Error::UnsupportedVersion {
            version: raw_version,
            min: MIN_VERSION,
            max: MAX_VERSION,
        })?;

        if bytes.len() < HEADER_SIZE {
            return Err(truncated());
        }

        let raw_flags = cursor.read_u8().map_err(|_| truncated())?;
        let priority = cursor.read_u8().map_err(|_| truncated())?;
        let reserved = cursor.read_u16::<LittleEndian>().map_err(|_| truncated())?;
        let entry_count = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;
        let block_count = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;
        let index_offset = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;
        let index_size = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;
        let index_crc = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;

        let flags = PackageFlags::from_bits(raw_flags)
            .map_err(|_| Error::malformed_header(format!("unknown flag bits {raw_flags:#04x}")))?;

        if reserved != 0 {
            return Err(Error::malformed_header(format!(
                "reserved field is {reserved:#06x}, expected 0"
            )));
        }

        if !version.supports_solid()
            && (flags.contains(PackageFlags::SOLID) || block_count != 0)
        {
            return Err(Error::malformed_header(format!(
                "{version:?} package declares solid blocks"
            )));
        }

        Ok(Self {
            version,
            flags,
            priority,
            entry_count,
            block_count,
            index_offset,
            index_size,
            index_crc,
        })
    }
}

/// Summary information about a package
#[derive(Debug, Clone, Serialize)]
pub struct PakInfo {
    pub version: u32,
    pub solid: bool,
    pub allow_memory_mapping: bool,
    pub preload: bool,
    pub priority: u8,
    pub entry_count: usize,
    pub block_count: usize,
    pub archive_size: u64,
    /// Sum of stored sizes (solid blocks count once)
    pub total_compressed: u64,
    pub total_decompressed: u64,
}

/// Progress information during PAK operations
#[derive(Debug, Clone)]
pub struct PakProgress {
    /// Current operation phase
    pub phase: PakPhase,
    /// Current item number (1-indexed)
    pub current: usize,
    /// Total number of items
    pub total: usize,
    /// Current file being processed (if applicable)
    pub current_file: Option<String>,
}

impl PakProgress {
    /// Create a new progress update
    #[must_use]
    pub fn new(phase: PakPhase, current: usize, total: usize) -> Self {
        Self {
            phase,
            current,
            total,
            current_file: None,
        }
    }

    /// Create a progress update with a file/item name
    #[must_use]
    pub fn with_file(
        phase: PakPhase,
        current: usize,
        total: usize,
        file: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            current,
            total,
            current_file: Some(file.into()),
        }
    }

    /// Get the progress percentage (0.0 - 1.0)
    #[must_use]
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.current as f32 / self.total as f32
        }
    }
}

/// Phase of PAK operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PakPhase {
    /// Reading PAK header
    ReadingHeader,
    /// Reading and validating the index
    ReadingTable,
    /// Decompressing individual files or solid blocks
    DecompressingFiles,
    /// Scanning files in a directory (during PAK creation)
    ScanningFiles,
    /// Compressing files (during PAK creation)
    CompressingFiles,
    /// Writing the index to the PAK
    WritingTable,
    /// Operation complete
    Complete,
}

impl PakPhase {
    /// Get a human-readable description of this phase
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadingHeader => "Reading header",
            Self::ReadingTable => "Reading file table",
            Self::DecompressingFiles => "Decompressing files",
            Self::ScanningFiles => "Scanning files",
            Self::CompressingFiles => "Compressing files",
            Self::WritingTable => "Writing file table",
            Self::Complete => "Complete",
        }
    }
}

/// Progress callback for PAK operations.
///
/// Must be `Sync + Send` to support parallel decompression.
pub type ProgressCallback<'a> = &'a (dyn Fn(&PakProgress) + Sync + Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn header() -> PakHeader {
        PakHeader {
            version: PackageVersion::V2,
            flags: PackageFlags::SOLID | PackageFlags::PRELOAD,
            priority: 12,
            entry_count: 3,
            block_count: 1,
            index_offset: 4096,
            index_size: 200,
            index_crc: 0xdead_beef,
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = header().to_bytes();
        assert_eq!(&bytes[0..4], b"LPAK");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 2);
        assert_eq!(bytes[8], 0x05);
        assert_eq!(bytes[9], 12);
        assert_eq!(u64::from_le_bytes(bytes[20..28].try_into().unwrap()), 4096);
        assert_eq!(PakHeader::parse(&bytes).unwrap(), header());
    }

    #[test]
    fn test_truncated_header() {
        let bytes = header().to_bytes();
        for len in [0, 3, 6, 8, 20, HEADER_SIZE - 1] {
            let err = PakHeader::parse(&bytes[..len]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedHeader, "length {len}");
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = header().to_bytes();
        bytes[0] = b'X';
        assert_eq!(PakHeader::parse(&bytes).unwrap_err().kind(), ErrorKind::MalformedHeader);
    }

    #[test]
    fn test_newer_version_rejected_first() {
        let mut bytes = header().to_bytes();
        bytes[4..8].copy_from_slice(&(MAX_VERSION + 1).to_le_bytes());
        // Garbage after the version must not mask the version error
        bytes[10] = 0xff;
        assert_eq!(
            PakHeader::parse(&bytes).unwrap_err().kind(),
            ErrorKind::UnsupportedVersion
        );
        assert_eq!(
            PakHeader::parse(&bytes[..8]).unwrap_err().kind(),
            ErrorKind::UnsupportedVersion
        );
    }

    #[test]
    fn test_v1_with_solid_blocks_rejected() {
        let mut h = header();
        h.version = PackageVersion::V1;
        let err = PakHeader::parse(&h.to_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);
    }

    #[test]
    fn test_progress_percentage() {
        assert!((PakProgress::new(PakPhase::Complete, 0, 0).percentage() - 1.0).abs() < f32::EPSILON);
        assert!((PakProgress::new(PakPhase::CompressingFiles, 1, 4).percentage() - 0.25).abs() < f32::EPSILON);
    }
}

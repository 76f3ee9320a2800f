//! Package reader
//!
//! [`PakReader::open`] parses the header and index and only ever returns a
//! reader that is ready for extraction; structural problems are reported
//! before any entry is touched. The reader owns its file handle or mapping
//! and releases it when dropped.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;

use super::{
    BLOCK_RECORD_SIZE, ENTRY_RECORD_FIXED_SIZE, HEADER_SIZE, NO_BLOCK, PakHeader, PakInfo,
    PakPhase, PakProgress, ProgressCallback,
};
use crate::compression::{self, CompressionMethod};
use crate::error::{Error, Result};
use crate::pak::index::{Entry, PackIndex, SolidBlock};
use crate::pak::options::PackageFlags;

/// Trait for types that can Read and Seek
trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Backing bytes of an open package
enum Storage {
    Mapped(Mmap),
    Stream(Mutex<BufReader<Box<dyn ReadSeek>>>),
}

impl Storage {
    fn stream<R: Read + Seek + Send + 'static>(reader: R) -> Self {
        let boxed: Box<dyn ReadSeek> = Box::new(reader);
        Storage::Stream(Mutex::new(BufReader::new(boxed)))
    }

    fn read_range(&self, offset: u64, len: u64) -> Result<Cow<'_, [u8]>> {
        match self {
            Storage::Mapped(map) => {
                let start = usize::try_from(offset).ok();
                let end = start.and_then(|s| s.checked_add(usize::try_from(len).ok()?));
                match (start, end) {
                    (Some(start), Some(end)) if end <= map.len() => {
                        Ok(Cow::Borrowed(&map[start..end]))
                    }
                    _ => Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("range {offset}+{len} beyond mapped archive of {} bytes", map.len()),
                    ))),
                }
            }
            Storage::Stream(reader) => {
                let mut reader = reader.lock().map_err(|_| {
                    Error::Io(std::io::Error::other("archive reader lock poisoned"))
                })?;
                reader.seek(SeekFrom::Start(offset))?;
                let mut buffer = vec![0u8; usize::try_from(len).map_err(|_| {
                    Error::Io(std::io::Error::other(format!("range of {len} bytes too large")))
                })?];
                reader.read_exact(&mut buffer)?;
                Ok(Cow::Owned(buffer))
            }
        }
    }
}

/// Map a package file read-only.
#[allow(unsafe_code)]
fn map_file(file: &File) -> std::io::Result<Mmap> {
    // SAFETY: the mapping is read-only and owned by the reader; packages are
    // not modified while they are open.
    unsafe { Mmap::map(file) }
}

/// Package reader
pub struct PakReader {
    storage: Storage,
    header: PakHeader,
    index: PackIndex,
    archive_len: u64,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for PakReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("entries", &self.index.len())
            .field("memory_mapped", &self.is_memory_mapped())
            .finish_non_exhaustive()
    }
}

impl PakReader {
    /// Open and validate a package file.
    ///
    /// The file is memory-mapped when the package allows it; otherwise it is
    /// read through a buffered handle. Both behave identically.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read,
    /// [`Error::MalformedHeader`] or [`Error::UnsupportedVersion`] for header
    /// problems and [`Error::MalformedIndex`] for index problems.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_progress(path, &|_| {})
    }

    /// Open a package file with progress callbacks.
    pub fn open_with_progress(path: impl AsRef<Path>, progress: ProgressCallback) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let archive_len = file.metadata()?.len();

        tracing::debug!("Opening PAK: {} ({archive_len} bytes)", path.display());

        progress(&PakProgress::new(PakPhase::ReadingHeader, 0, 1));
        let mut leading = Vec::with_capacity(HEADER_SIZE);
        (&file).take(HEADER_SIZE as u64).read_to_end(&mut leading)?;
        let header = PakHeader::parse(&leading)?;

        let storage = if header.flags.contains(PackageFlags::ALLOW_MEMORY_MAPPING) {
            match map_file(&file) {
                Ok(map) => {
                    tracing::debug!("Memory-mapped {}", path.display());
                    Storage::Mapped(map)
                }
                Err(e) => {
                    tracing::debug!("Failed to memory-map {}, using buffered reads: {e}", path.display());
                    Storage::stream(file)
                }
            }
        } else {
            Storage::stream(file)
        };

        let mut reader = Self::parse(storage, header, archive_len, progress)?;
        reader.path = Some(path.to_path_buf());
        Ok(reader)
    }

    /// Read a package from any seekable source.
    pub fn from_reader<R: Read + Seek + Send + 'static>(mut reader: R) -> Result<Self> {
        let archive_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut leading = Vec::with_capacity(HEADER_SIZE);
        (&mut reader).take(HEADER_SIZE as u64).read_to_end(&mut leading)?;
        let header = PakHeader::parse(&leading)?;

        let storage = Storage::stream(reader);
        Self::parse(storage, header, archive_len, &|_| {})
    }

    fn parse(
        storage: Storage,
        header: PakHeader,
        archive_len: u64,
        progress: ProgressCallback,
    ) -> Result<Self> {
        progress(&PakProgress::new(PakPhase::ReadingTable, 0, 1));

        let index_end = header.index_offset.checked_add(u64::from(header.index_size));
        if header.index_offset < HEADER_SIZE as u64 || index_end.is_none_or(|end| end > archive_len) {
            return Err(Error::malformed_index(
                header.index_offset,
                format!(
                    "index ({} bytes at {}) lies outside the archive of {archive_len} bytes",
                    header.index_size, header.index_offset
                ),
            ));
        }

        let index_bytes = storage.read_range(header.index_offset, u64::from(header.index_size))?;
        let actual_crc = crc32fast::hash(&index_bytes);
        if actual_crc != header.index_crc {
            return Err(Error::malformed_index(
                header.index_offset,
                format!(
                    "index checksum mismatch: expected {:08x}, found {actual_crc:08x}",
                    header.index_crc
                ),
            ));
        }

        let index = parse_index(&index_bytes, &header)?;
        drop(index_bytes);

        index.validate_ranges(HEADER_SIZE as u64..header.index_offset)?;

        progress(&PakProgress::new(PakPhase::ReadingTable, 1, 1));
        tracing::debug!(
            "Read PAK index: {} entries, {} solid blocks",
            index.len(),
            index.blocks().len()
        );

        Ok(Self {
            storage,
            header,
            index,
            archive_len,
            path: None,
        })
    }

    pub fn header(&self) -> &PakHeader {
        &self.header
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// Look up an entry by path (separator and case insensitive).
    pub fn lookup(&self, path: &str) -> Option<&Entry> {
        self.index.lookup(path)
    }

    /// All entries in index order.
    pub fn iter_all(&self) -> std::slice::Iter<'_, Entry> {
        self.index.iter_all()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_memory_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// Get the PAK version
    pub fn version(&self) -> u32 {
        self.header.version.as_u32()
    }

    /// Get the number of files in the PAK
    pub fn file_count(&self) -> usize {
        self.index.len()
    }

    /// Aggregate information about the package.
    pub fn info(&self) -> PakInfo {
        let stored: u64 = self
            .index
            .iter_all()
            .filter(|e| e.block.is_none())
            .map(|e| e.size_compressed)
            .sum::<u64>()
            + self.index.blocks().iter().map(|b| b.size_compressed).sum::<u64>();

        PakInfo {
            version: self.version(),
            solid: self.header.flags.contains(PackageFlags::SOLID),
            allow_memory_mapping: self.header.flags.contains(PackageFlags::ALLOW_MEMORY_MAPPING),
            preload: self.header.flags.contains(PackageFlags::PRELOAD),
            priority: self.header.priority,
            entry_count: self.index.len(),
            block_count: self.index.blocks().len(),
            archive_size: self.archive_len,
            total_compressed: stored,
            total_decompressed: self.index.iter_all().map(|e| e.size_decompressed).sum(),
        }
    }

    /// Decompress one solid block.
    pub(crate) fn decompress_block(&self, id: u32) -> Result<Vec<u8>> {
        let block = self.index.block(id).ok_or_else(|| {
            Error::malformed_index(self.header.index_offset, format!("missing solid block {id}"))
        })?;
        let stored = self.storage.read_range(block.offset, block.size_compressed)?;
        verify_stored(&format!("solid block {id}"), block.checksum, &stored)?;
        compression::decompress(&stored, block.compression, to_usize(block.size_decompressed)?)
            .map_err(|e| e.for_entry(&format!("solid block {id}")))
    }

    /// Read, decompress and verify a non-solid entry.
    pub(crate) fn read_stored_entry(&self, entry: &Entry) -> Result<Vec<u8>> {
        let stored = self.storage.read_range(entry.offset, entry.size_compressed)?;
        verify_stored(&entry.path, entry.stored_checksum, &stored)?;
        let data = compression::decompress(
            &stored,
            entry.compression,
            to_usize(entry.size_decompressed)?,
        )
        .map_err(|e| e.for_entry(&entry.path))?;
        verify_checksum(entry, &data)?;
        Ok(data)
    }

    /// Read, decompress and verify any entry. Solid entries decompress their
    /// whole block; use the extraction methods to share that work.
    pub(crate) fn entry_data(&self, entry: &Entry) -> Result<Vec<u8>> {
        match entry.block {
            None => self.read_stored_entry(entry),
            Some(id) => {
                let block = self.decompress_block(id).map_err(|e| e.for_entry(&entry.path))?;
                let data = slice_solid_entry(&block, entry)?.to_vec();
                Ok(data)
            }
        }
    }

    /// Read a single file's verified bytes.
    ///
    /// # Errors
    /// Returns [`Error::EntryNotFound`] if the path is not in the index, or
    /// any read, decompression or checksum error for the entry.
    pub fn read_entry(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self
            .lookup(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_string()))?;
        self.entry_data(entry)
    }
}

/// Slice a solid entry out of its decompressed block and verify it.
pub(crate) fn slice_solid_entry<'a>(block: &'a [u8], entry: &Entry) -> Result<&'a [u8]> {
    let start = to_usize(entry.offset)?;
    let end = to_usize(entry.range().end)?;
    let data = block.get(start..end).ok_or_else(|| Error::CorruptData {
        entry: Some(entry.path.clone()),
        message: format!(
            "range {start}..{end} beyond decompressed block of {} bytes",
            block.len()
        ),
    })?;
    verify_checksum(entry, data)?;
    Ok(data)
}

pub(crate) fn verify_checksum(entry: &Entry, data: &[u8]) -> Result<()> {
    let actual = crc32fast::hash(data);
    if actual != entry.checksum {
        return Err(Error::ChecksumMismatch {
            path: entry.path.clone(),
            expected: entry.checksum,
            actual,
        });
    }
    Ok(())
}

/// Check stored bytes before they reach a decoder.
fn verify_stored(path: &str, expected: u32, stored: &[u8]) -> Result<()> {
    let actual = crc32fast::hash(stored);
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            path: path.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::Io(std::io::Error::other(format!("{value} bytes exceeds address space"))))
}

/// Parse the index region (block records, then entry records).
fn parse_index(bytes: &[u8], header: &PakHeader) -> Result<PackIndex> {
    let base = header.index_offset;
    let block_count = header.block_count as usize;
    let entry_count = header.entry_count as usize;

    let minimum = block_count
        .checked_mul(BLOCK_RECORD_SIZE)
        .zip(entry_count.checked_mul(ENTRY_RECORD_FIXED_SIZE))
        .and_then(|(blocks, entries)| blocks.checked_add(entries));
    if minimum.is_none_or(|needed| needed > bytes.len()) {
        return Err(Error::malformed_index(
            base,
            format!(
                "index of {} bytes cannot hold {block_count} blocks and {entry_count} entries",
                bytes.len()
            ),
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let at = |cursor: &Cursor<&[u8]>| base + cursor.position();
    let truncated = |cursor: &Cursor<&[u8]>| Error::malformed_index(at(cursor), "index truncated");

    let mut blocks = Vec::with_capacity(block_count);
    for id in 0..block_count {
        let offset = cursor.read_u64::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let size_compressed = cursor.read_u64::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let size_decompressed = cursor.read_u64::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let method_id = cursor.read_u8().map_err(|_| truncated(&cursor))?;
        let compression = CompressionMethod::from_id(method_id).ok_or_else(|| {
            Error::malformed_index(
                at(&cursor),
                format!("solid block {id} uses unknown compression {method_id}"),
            )
        })?;
        let checksum = cursor.read_u32::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        blocks.push(SolidBlock {
            offset,
            size_compressed,
            size_decompressed,
            compression,
            checksum,
        });
    }

    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let record_start = at(&cursor);
        let path_len = cursor.read_u16::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let mut path_bytes = vec![0u8; path_len as usize];
        cursor.read_exact(&mut path_bytes).map_err(|_| truncated(&cursor))?;
        let path = String::from_utf8(path_bytes)
            .map_err(|_| Error::malformed_index(record_start, "entry path is not UTF-8"))?;

        let size_decompressed = cursor.read_u64::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let size_compressed = cursor.read_u64::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let offset = cursor.read_u64::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let method_id = cursor.read_u8().map_err(|_| truncated(&cursor))?;
        let block = cursor.read_u32::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let checksum = cursor.read_u32::<LittleEndian>().map_err(|_| truncated(&cursor))?;
        let stored_checksum = cursor.read_u32::<LittleEndian>().map_err(|_| truncated(&cursor))?;

        let mut compression = CompressionMethod::from_id(method_id).ok_or_else(|| {
            Error::malformed_index(
                record_start,
                format!("{path} uses unknown compression {method_id}"),
            )
        })?;

        let block = if block == NO_BLOCK {
            None
        } else {
            let solid = blocks.get(block as usize).ok_or_else(|| {
                Error::malformed_index(
                    record_start,
                    format!("{path} references missing solid block {block}"),
                )
            })?;
            compression = solid.compression;
            Some(block)
        };

        entries.push(Entry {
            path,
            size_decompressed,
            size_compressed,
            offset,
            compression,
            block,
            checksum,
            stored_checksum,
        });
    }

    if cursor.position() != bytes.len() as u64 {
        return Err(Error::malformed_index(
            at(&cursor),
            format!("{} trailing bytes after index", bytes.len() as u64 - cursor.position()),
        ));
    }

    PackIndex::new(entries, blocks).map_err(|e| Error::malformed_index(base, e.to_string()))
}

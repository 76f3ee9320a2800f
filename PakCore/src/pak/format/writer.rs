//! Package writer with progress callbacks
//!
//! Output is staged in a temporary file next to the destination and renamed
//! into place only after the header has been back-patched, so a failed write
//! never leaves a partial package at the target path.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use byteorder::{LittleEndian, WriteBytesExt};
use rayon::prelude::*;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::{HEADER_SIZE, NO_BLOCK, PakHeader, PakPhase, PakProgress, ProgressCallback};
use crate::compression::{self, CompressionMethod};
use crate::error::{Error, Result};
use crate::pak::index::{Entry, EntrySource, IndexBuilder, PackIndex, PendingEntry, SolidBlock};
use crate::pak::options::PackageOptions;
use crate::utils::path::relative_path;

/// Number of entries compressed in parallel before being written out
const COMPRESS_BATCH: usize = 256;

/// 8MB buffer for sequential writes
const WRITE_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// An entry compressed and ready to be written
struct CompressedEntry {
    path: String,
    stored: Vec<u8>,
    compression: CompressionMethod,
    size_decompressed: u64,
    checksum: u32,
    stored_checksum: u32,
}

/// Solid block being filled
#[derive(Default)]
struct OpenBlock {
    data: Vec<u8>,
    members: usize,
}

/// Package writer
pub struct PakWriter {
    /// Files to include in the package
    builder: IndexBuilder,
    options: PackageOptions,
}

impl PakWriter {
    /// Create a new writer for the given directory.
    ///
    /// Walks the directory recursively; symlinks are skipped.
    ///
    /// # Errors
    /// Returns [`Error::SourceNotFound`] if `root_path` is not a directory,
    /// [`Error::EmptySource`] if it contains no files (unless the options
    /// allow empty packages) and [`Error::DuplicateEntry`] if two files
    /// normalize to the same archive path.
    pub fn new(root_path: impl Into<PathBuf>, options: PackageOptions) -> Result<Self> {
        Self::new_with_progress(root_path, options, &|_| {})
    }

    /// Create a new writer, reporting the directory scan.
    pub fn new_with_progress(
        root_path: impl Into<PathBuf>,
        options: PackageOptions,
        progress: ProgressCallback,
    ) -> Result<Self> {
        let root_path = root_path.into();
        if !root_path.is_dir() {
            return Err(Error::SourceNotFound { path: root_path });
        }

        tracing::info!("Scanning directory: {}", root_path.display());
        let builder = Self::collect_files(&root_path, progress)?;

        if builder.is_empty() && !options.allow_empty() {
            return Err(Error::EmptySource { path: root_path });
        }

        tracing::info!("Found {} files", builder.len());

        Ok(Self { builder, options })
    }

    /// Create a writer from entries collected by the caller.
    ///
    /// # Errors
    /// Returns [`Error::EmptySource`] if the builder is empty and the options
    /// do not allow empty packages.
    pub fn from_builder(builder: IndexBuilder, options: PackageOptions) -> Result<Self> {
        if builder.is_empty() && !options.allow_empty() {
            return Err(Error::EmptySource {
                path: PathBuf::new(),
            });
        }
        Ok(Self { builder, options })
    }

    /// Collect all files from a directory recursively
    fn collect_files(root: &Path, progress: ProgressCallback) -> Result<IndexBuilder> {
        let mut builder = IndexBuilder::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry?;
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                tracing::debug!("Skipping symlink: {}", entry.path().display());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let relative = relative_path(entry.path(), root)?;
            progress(&PakProgress::with_file(
                PakPhase::ScanningFiles,
                builder.len() + 1,
                0,
                relative.clone(),
            ));
            builder.add_entry(&relative, EntrySource::File(entry.path().to_path_buf()))?;
        }

        Ok(builder)
    }

    /// Get the number of files that will be written
    pub fn file_count(&self) -> usize {
        self.builder.len()
    }

    /// Write the package
    pub fn write(self, output_path: impl AsRef<Path>) -> Result<()> {
        self.write_with_progress(output_path, &|_| {})
    }

    /// Write the package with progress callback
    ///
    /// # Errors
    /// Returns [`Error::WriteFailed`] if the output cannot be written, or any
    /// error raised while reading and compressing a source file. No file is
    /// left at `output_path` on failure.
    pub fn write_with_progress(
        self,
        output_path: impl AsRef<Path>,
        progress: ProgressCallback,
    ) -> Result<()> {
        let output_path = output_path.as_ref();
        let options = self.options;
        let pending = self.builder.finalize();

        let parent = match output_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| Error::write_failed(&parent, e))?;

        // Dropping the temp file on any error path removes it.
        let mut staging =
            NamedTempFile::new_in(&parent).map_err(|e| Error::write_failed(output_path, e))?;

        let (entry_total, block_count) =
            write_package(staging.as_file_mut(), &pending, &options, output_path, progress)?;

        staging
            .persist(output_path)
            .map_err(|e| Error::write_failed(output_path, e.error))?;

        progress(&PakProgress::new(PakPhase::Complete, entry_total, entry_total));
        tracing::info!(
            "PAK created successfully: {} ({} entries, {} solid blocks)",
            output_path.display(),
            entry_total,
            block_count
        );

        Ok(())
    }
}

/// Write header placeholder, payloads and index into `file`, then back-patch
/// the header. Returns the entry and block counts.
fn write_package(
    file: &mut File,
    pending: &[PendingEntry],
    options: &PackageOptions,
    output_path: &Path,
    progress: ProgressCallback,
) -> Result<(usize, u32)> {
    let entry_count = u32::try_from(pending.len())
        .map_err(|_| Error::PakTooManyFiles { count: pending.len() })?;

    let mut sink = PayloadSink {
        out: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
        position: 0,
        output_path,
    };
    // Placeholder header, back-patched once the index is known
    sink.write_all(&[0u8; HEADER_SIZE])?;

    let (entries, blocks) = if options.is_solid() {
        write_solid(&mut sink, pending, options, progress)?
    } else {
        (write_independent(&mut sink, pending, options, progress)?, Vec::new())
    };

    progress(&PakProgress::new(PakPhase::WritingTable, 0, 1));

    let index_offset = sink.position;
    let index_bytes = serialize_index(&entries, &blocks)?;
    let index_size = u32::try_from(index_bytes.len()).map_err(|_| {
        Error::malformed_index(index_offset, format!("index too large: {} bytes", index_bytes.len()))
    })?;
    sink.write_all(&index_bytes)?;

    let block_count = blocks.len() as u32;
    let index = PackIndex::new(entries, blocks)?;
    index.validate_ranges(HEADER_SIZE as u64..index_offset)?;

    let header = PakHeader {
        version: options.version(),
        flags: options.flags(),
        priority: options.priority(),
        entry_count,
        block_count,
        index_offset,
        index_size,
        index_crc: crc32fast::hash(&index_bytes),
    };

    let file = sink
        .out
        .into_inner()
        .map_err(|e| Error::write_failed(output_path, e.into_error()))?;
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.write_all(&header.to_bytes()))
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::write_failed(output_path, e))?;

    Ok((index.len(), block_count))
}

/// Buffered output that tracks the absolute write position
struct PayloadSink<'a, W: Write> {
    out: BufWriter<W>,
    position: u64,
    output_path: &'a Path,
}

impl<W: Write> PayloadSink<'_, W> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.position;
        self.out
            .write_all(bytes)
            .map_err(|e| Error::write_failed(self.output_path, e))?;
        self.position += bytes.len() as u64;
        Ok(offset)
    }
}

/// Read, checksum and compress one entry.
fn compress_entry(pending: &PendingEntry, options: &PackageOptions) -> Result<CompressedEntry> {
    let data = pending.source.read()?;
    let checksum = crc32fast::hash(&data);
    let packed = compression::compress(&data, options.compression(), options.fast_compression())?;

    // Store incompressible content as-is
    let (stored, compression) =
        if options.compression() != CompressionMethod::None && packed.len() >= data.len() {
            (data.to_vec(), CompressionMethod::None)
        } else {
            (packed, options.compression())
        };

    Ok(CompressedEntry {
        path: pending.path.clone(),
        stored_checksum: crc32fast::hash(&stored),
        stored,
        compression,
        size_decompressed: data.len() as u64,
        checksum,
    })
}

/// Write every entry compressed on its own.
fn write_independent<W: Write>(
    sink: &mut PayloadSink<'_, W>,
    pending: &[PendingEntry],
    options: &PackageOptions,
    progress: ProgressCallback,
) -> Result<Vec<Entry>> {
    let total = pending.len();
    let processed = AtomicUsize::new(0);
    let mut entries = Vec::with_capacity(total);

    for batch in pending.chunks(COMPRESS_BATCH) {
        let compressed: Vec<CompressedEntry> = batch
            .par_iter()
            .map(|p| {
                let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
                progress(&PakProgress::with_file(
                    PakPhase::CompressingFiles,
                    current,
                    total,
                    p.path.clone(),
                ));
                compress_entry(p, options)
            })
            .collect::<Result<_>>()?;

        for file in compressed {
            let offset = sink.write_all(&file.stored)?;
            entries.push(Entry {
                path: file.path,
                size_decompressed: file.size_decompressed,
                size_compressed: file.stored.len() as u64,
                offset,
                compression: file.compression,
                block: None,
                checksum: file.checksum,
                stored_checksum: file.stored_checksum,
            });
        }
    }

    Ok(entries)
}

/// Write entries concatenated into shared solid blocks.
fn write_solid<W: Write>(
    sink: &mut PayloadSink<'_, W>,
    pending: &[PendingEntry],
    options: &PackageOptions,
    progress: ProgressCallback,
) -> Result<(Vec<Entry>, Vec<SolidBlock>)> {
    let total = pending.len();
    let mut entries = Vec::with_capacity(total);
    let mut blocks = Vec::new();
    let mut open = OpenBlock::default();

    for (i, p) in pending.iter().enumerate() {
        progress(&PakProgress::with_file(
            PakPhase::CompressingFiles,
            i + 1,
            total,
            p.path.clone(),
        ));

        let data = p.source.read()?;
        if open.members > 0 && open.data.len() + data.len() > options.solid_block_size() {
            let block = flush_block(sink, &mut open, options)?;
            blocks.push(block);
        }

        let block_id = u32::try_from(blocks.len())
            .ok()
            .filter(|&id| id != NO_BLOCK)
            .ok_or(Error::PakTooManyFiles { count: total })?;

        entries.push(Entry {
            path: p.path.clone(),
            size_decompressed: data.len() as u64,
            size_compressed: data.len() as u64,
            offset: open.data.len() as u64,
            compression: options.compression(),
            block: Some(block_id),
            checksum: crc32fast::hash(&data),
            stored_checksum: 0,
        });
        open.data.extend_from_slice(&data);
        open.members += 1;
    }

    if open.members > 0 {
        blocks.push(flush_block(sink, &mut open, options)?);
    }

    // Entries inherit the method their block ended up stored with
    for entry in &mut entries {
        if let Some(id) = entry.block {
            entry.compression = blocks[id as usize].compression;
        }
    }

    Ok((entries, blocks))
}

fn flush_block<W: Write>(
    sink: &mut PayloadSink<'_, W>,
    open: &mut OpenBlock,
    options: &PackageOptions,
) -> Result<SolidBlock> {
    let data = std::mem::take(&mut open.data);
    open.members = 0;

    let packed = compression::compress(&data, options.compression(), options.fast_compression())?;
    let (stored, compression) =
        if options.compression() != CompressionMethod::None && packed.len() >= data.len() {
            (data.as_slice(), CompressionMethod::None)
        } else {
            (packed.as_slice(), options.compression())
        };

    let offset = sink.write_all(stored)?;
    tracing::debug!(
        "Wrote solid block at {offset}: {} -> {} bytes ({})",
        data.len(),
        stored.len(),
        compression.as_str()
    );

    Ok(SolidBlock {
        offset,
        size_compressed: stored.len() as u64,
        size_decompressed: data.len() as u64,
        compression,
        checksum: crc32fast::hash(stored),
    })
}

/// Encode block records followed by entry records.
fn serialize_index(entries: &[Entry], blocks: &[SolidBlock]) -> Result<Vec<u8>> {
    let mut table = Vec::with_capacity(
        blocks.len() * super::BLOCK_RECORD_SIZE
            + entries
                .iter()
                .map(|e| super::ENTRY_RECORD_FIXED_SIZE + e.path.len())
                .sum::<usize>(),
    );

    for block in blocks {
        table.write_u64::<LittleEndian>(block.offset)?;
        table.write_u64::<LittleEndian>(block.size_compressed)?;
        table.write_u64::<LittleEndian>(block.size_decompressed)?;
        table.write_u8(block.compression.id())?;
        table.write_u32::<LittleEndian>(block.checksum)?;
    }

    for entry in entries {
        let path_len = u16::try_from(entry.path.len()).map_err(|_| {
            Error::InvalidPath(format!("path longer than 65535 bytes: {}", entry.path))
        })?;
        table.write_u16::<LittleEndian>(path_len)?;
        table.write_all(entry.path.as_bytes())?;
        table.write_u64::<LittleEndian>(entry.size_decompressed)?;
        table.write_u64::<LittleEndian>(entry.size_compressed)?;
        table.write_u64::<LittleEndian>(entry.offset)?;
        table.write_u8(entry.compression.id())?;
        table.write_u32::<LittleEndian>(entry.block.unwrap_or(NO_BLOCK))?;
        table.write_u32::<LittleEndian>(entry.checksum)?;
        table.write_u32::<LittleEndian>(entry.stored_checksum)?;
    }

    Ok(table)
}

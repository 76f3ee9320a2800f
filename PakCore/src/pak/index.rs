//! Table of contents of a package
//!
//! [`IndexBuilder`] collects entries while a package is being created;
//! [`PackIndex`] is the validated, read-only index of an existing package.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;

use serde::Serialize;

use crate::compression::CompressionMethod;
use crate::error::{Error, Result};
use crate::utils::{normalize_path, path_key};

/// One packaged file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Forward-slash normalized path inside the archive
    pub path: String,
    /// Size of the file content
    pub size_decompressed: u64,
    /// Stored size; for solid entries, the length of the range inside the block
    pub size_compressed: u64,
    /// Absolute archive offset; for solid entries, the offset inside the decompressed block
    pub offset: u64,
    /// Compression of the stored bytes (inherited from the block for solid entries)
    pub compression: CompressionMethod,
    /// Solid block holding this entry
    pub block: Option<u32>,
    /// CRC-32 of the uncompressed content
    pub checksum: u32,
    /// CRC-32 of the stored bytes; zero for solid entries, whose block carries it
    pub stored_checksum: u32,
}

impl Entry {
    /// Byte range this entry occupies (in the archive, or in its block when solid)
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset.saturating_add(self.size_compressed)
    }
}

/// A shared compressed block referenced by several solid entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SolidBlock {
    /// Absolute archive offset of the compressed block
    pub offset: u64,
    pub size_compressed: u64,
    pub size_decompressed: u64,
    pub compression: CompressionMethod,
    /// CRC-32 of the stored block bytes
    pub checksum: u32,
}

impl SolidBlock {
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset.saturating_add(self.size_compressed)
    }
}

/// Validated index of a package
#[derive(Debug, Clone, Default)]
pub struct PackIndex {
    entries: Vec<Entry>,
    blocks: Vec<SolidBlock>,
    by_key: HashMap<String, usize>,
}

impl PackIndex {
    /// Build an index from entries in index order.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateEntry`] if two entries share a key, or
    /// [`Error::InvalidPath`] if a path is not normalized.
    pub fn new(entries: Vec<Entry>, blocks: Vec<SolidBlock>) -> Result<Self> {
        let mut by_key = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let normalized = normalize_path(&entry.path)?;
            if normalized != entry.path {
                return Err(Error::InvalidPath(format!(
                    "entry path is not normalized: {}",
                    entry.path
                )));
            }
            if let Some(existing) = by_key.insert(path_key(&entry.path), i) {
                return Err(Error::DuplicateEntry {
                    path: entry.path.clone(),
                    existing: entries[existing].path.clone(),
                });
            }
        }

        Ok(Self {
            entries,
            blocks,
            by_key,
        })
    }

    /// Find an entry by path. Separators and case are normalized first.
    pub fn lookup(&self, path: &str) -> Option<&Entry> {
        let normalized = normalize_path(path).ok()?;
        self.by_key
            .get(&path_key(&normalized))
            .map(|&i| &self.entries[i])
    }

    /// All entries in index order. Call again to restart.
    pub fn iter_all(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn blocks(&self) -> &[SolidBlock] {
        &self.blocks
    }

    pub fn block(&self, id: u32) -> Option<&SolidBlock> {
        self.blocks.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every byte range against the payload region.
    ///
    /// Non-solid entries and solid blocks must lie within `payload` and must
    /// not overlap each other; solid entries must lie within their block's
    /// decompressed size.
    ///
    /// # Errors
    /// Returns [`Error::MalformedIndex`] describing the first violation.
    pub fn validate_ranges(&self, payload: Range<u64>) -> Result<()> {
        let mut stored: Vec<(Range<u64>, &str)> = Vec::with_capacity(self.entries.len());

        for (id, block) in self.blocks.iter().enumerate() {
            let range = block.range();
            if range.start < payload.start || range.end > payload.end {
                return Err(Error::malformed_index(
                    block.offset,
                    format!(
                        "solid block {id} ({}..{}) lies outside the payload region ({}..{})",
                        range.start, range.end, payload.start, payload.end
                    ),
                ));
            }
            stored.push((range, "solid block"));
        }

        for entry in &self.entries {
            let range = entry.range();
            match entry.block {
                Some(id) => {
                    let block = self.block(id).ok_or_else(|| {
                        Error::malformed_index(
                            entry.offset,
                            format!("{} references missing solid block {id}", entry.path),
                        )
                    })?;
                    if range.end > block.size_decompressed {
                        return Err(Error::malformed_index(
                            entry.offset,
                            format!(
                                "{} ({}..{}) exceeds solid block {id} of {} bytes",
                                entry.path, range.start, range.end, block.size_decompressed
                            ),
                        ));
                    }
                    if entry.size_compressed != entry.size_decompressed {
                        return Err(Error::malformed_index(
                            entry.offset,
                            format!("{} has a solid range that differs from its size", entry.path),
                        ));
                    }
                }
                None => {
                    if range.start < payload.start || range.end > payload.end {
                        return Err(Error::malformed_index(
                            entry.offset,
                            format!(
                                "{} ({}..{}) lies outside the payload region ({}..{})",
                                entry.path, range.start, range.end, payload.start, payload.end
                            ),
                        ));
                    }
                    stored.push((range, entry.path.as_str()));
                }
            }
        }

        stored.retain(|(range, _)| !range.is_empty());
        stored.sort_by_key(|(range, _)| (range.start, range.end));
        for pair in stored.windows(2) {
            let (first, first_name) = &pair[0];
            let (second, second_name) = &pair[1];
            if first.end > second.start {
                return Err(Error::malformed_index(
                    second.start,
                    format!("{second_name} overlaps {first_name}"),
                ));
            }
        }

        Ok(())
    }
}

/// Where the content of an entry being added comes from
#[derive(Debug, Clone)]
pub enum EntrySource {
    /// A file on disk, read when the entry is compressed
    File(PathBuf),
    /// Content already in memory
    Bytes(Vec<u8>),
}

impl EntrySource {
    /// Load the content.
    pub fn read(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            EntrySource::File(path) => Ok(Cow::Owned(std::fs::read(path)?)),
            EntrySource::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }
}

/// An entry queued for writing
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub path: String,
    pub source: EntrySource,
}

/// Collects entries for a package being created
#[derive(Debug, Default)]
pub struct IndexBuilder {
    pending: Vec<PendingEntry>,
    by_key: HashMap<String, usize>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an entry.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateEntry`] if the normalized path was already
    /// added (case-insensitively), or [`Error::InvalidPath`] if it escapes
    /// the archive root.
    pub fn add_entry(&mut self, relative_path: &str, source: EntrySource) -> Result<()> {
        let path = normalize_path(relative_path)?;
        let key = path_key(&path);

        if let Some(&existing) = self.by_key.get(&key) {
            return Err(Error::DuplicateEntry {
                path,
                existing: self.pending[existing].path.clone(),
            });
        }

        self.by_key.insert(key, self.pending.len());
        self.pending.push(PendingEntry { path, source });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Entries in index order (sorted by normalized path).
    pub fn finalize(self) -> Vec<PendingEntry> {
        let mut pending = self.pending;
        pending.sort_by(|a, b| a.path.cmp(&b.path));
        pending
    }
}

//! Core package operations

use std::path::Path;

use super::extract::ExtractionSummary;
use super::format::{PakInfo, PakPhase, PakProgress, PakReader, PakWriter, ProgressCallback};
use super::index::Entry;
use super::options::{ExtractOptions, PackageOptions};
use crate::error::Result;

/// Unpack an archive into `destination_dir` with the default
/// [`ExtractOptions`] (best effort, no cancellation).
///
/// # Errors
///
/// Returns [`Error::MalformedHeader`], [`Error::UnsupportedVersion`] or
/// [`Error::MalformedIndex`] if the archive is not readable, and
/// [`Error::WriteFailed`] if the destination cannot be created. Per-entry
/// failures are reported in the returned summary.
///
/// [`Error::MalformedHeader`]: crate::Error::MalformedHeader
/// [`Error::UnsupportedVersion`]: crate::Error::UnsupportedVersion
/// [`Error::MalformedIndex`]: crate::Error::MalformedIndex
/// [`Error::WriteFailed`]: crate::Error::WriteFailed
pub fn unpack(
    archive_path: impl AsRef<Path>,
    destination_dir: impl AsRef<Path>,
) -> Result<ExtractionSummary> {
    PakOperations::extract(archive_path, destination_dir)
}

/// Pack `source_dir` into a new archive at `output_path`.
///
/// # Errors
///
/// Returns [`Error::SourceNotFound`], [`Error::EmptySource`],
/// [`Error::DuplicateEntry`] or [`Error::InvalidPath`] for source problems
/// and [`Error::WriteFailed`] if the archive cannot be written. No file is
/// left at `output_path` on failure.
///
/// [`Error::SourceNotFound`]: crate::Error::SourceNotFound
/// [`Error::EmptySource`]: crate::Error::EmptySource
/// [`Error::DuplicateEntry`]: crate::Error::DuplicateEntry
/// [`Error::InvalidPath`]: crate::Error::InvalidPath
/// [`Error::WriteFailed`]: crate::Error::WriteFailed
pub fn pack(
    source_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    options: &PackageOptions,
) -> Result<()> {
    PakOperations::create_with_options(source_dir, output_path, options)
}

/// High-level package operations.
pub struct PakOperations;

impl PakOperations {
    /// Extract a package to a directory
    ///
    /// # Errors
    ///
    /// See [`unpack`].
    pub fn extract(
        pak_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<ExtractionSummary> {
        Self::extract_with_progress(pak_path, output_dir, &ExtractOptions::default(), &|_| {})
    }

    /// Extract a package with explicit failure policy and cancellation
    ///
    /// # Errors
    ///
    /// As [`PakOperations::extract`]; under [`FailurePolicy::FailFast`] the
    /// first per-entry error is returned instead of a summary.
    ///
    /// [`FailurePolicy::FailFast`]: crate::pak::FailurePolicy::FailFast
    pub fn extract_with_options(
        pak_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        options: &ExtractOptions,
    ) -> Result<ExtractionSummary> {
        Self::extract_with_progress(pak_path, output_dir, options, &|_| {})
    }

    /// Extract a package to a directory with progress callback
    ///
    /// The callback receives [`PakProgress`] with phase and file information.
    /// Entries are decompressed in parallel; each solid block is decoded once.
    pub fn extract_with_progress(
        pak_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        options: &ExtractOptions,
        progress: ProgressCallback,
    ) -> Result<ExtractionSummary> {
        let reader = PakReader::open_with_progress(pak_path, progress)?;
        reader.extract_all_with_progress(output_dir, options, progress)
    }

    /// Extract specific files from a package to a directory
    ///
    /// Takes a list of paths as they appear in the package (matching is
    /// case-insensitive) and extracts only those files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] if any requested path is missing.
    ///
    /// [`Error::EntryNotFound`]: crate::Error::EntryNotFound
    pub fn extract_files<S: AsRef<str>>(
        pak_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        file_paths: &[S],
    ) -> Result<ExtractionSummary> {
        let reader = PakReader::open(pak_path)?;
        reader.extract_files(output_dir, file_paths, &ExtractOptions::default())
    }

    /// Extract one file to an explicit destination path
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] if the path is not in the package, or
    /// the read, checksum or write error for that entry.
    ///
    /// [`Error::EntryNotFound`]: crate::Error::EntryNotFound
    pub fn extract_one(
        pak_path: impl AsRef<Path>,
        file_path: &str,
        destination_path: impl AsRef<Path>,
    ) -> Result<()> {
        PakReader::open(pak_path)?.extract_one(file_path, destination_path)
    }

    /// Read a single file's bytes from a package without writing to disk
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] if the requested file path is not in
    /// the package, or [`Error::ChecksumMismatch`] / [`Error::CorruptData`]
    /// if its content does not verify.
    ///
    /// [`Error::EntryNotFound`]: crate::Error::EntryNotFound
    /// [`Error::ChecksumMismatch`]: crate::Error::ChecksumMismatch
    /// [`Error::CorruptData`]: crate::Error::CorruptData
    pub fn read_file_bytes(pak_path: impl AsRef<Path>, file_path: &str) -> Result<Vec<u8>> {
        PakReader::open(pak_path)?.read_entry(file_path)
    }

    /// List contents of a package in index order
    pub fn list(pak_path: impl AsRef<Path>) -> Result<Vec<String>> {
        Self::list_with_progress(pak_path, &|_| {})
    }

    /// List contents of a package with progress callback
    pub fn list_with_progress(
        pak_path: impl AsRef<Path>,
        progress: ProgressCallback,
    ) -> Result<Vec<String>> {
        let reader = PakReader::open_with_progress(pak_path, progress)?;
        let paths: Vec<String> = reader.iter_all().map(|e| e.path.clone()).collect();

        progress(&PakProgress::new(PakPhase::Complete, paths.len(), paths.len()));
        Ok(paths)
    }

    /// List contents of a package with sizes, compression and checksums
    pub fn list_detailed(pak_path: impl AsRef<Path>) -> Result<Vec<Entry>> {
        let reader = PakReader::open(pak_path)?;
        Ok(reader.iter_all().cloned().collect())
    }

    /// Summary of a package's header and index
    pub fn info(pak_path: impl AsRef<Path>) -> Result<PakInfo> {
        Ok(PakReader::open(pak_path)?.info())
    }

    /// Create a package from a directory with the default options
    ///
    /// # Errors
    ///
    /// See [`pack`].
    pub fn create(source_dir: impl AsRef<Path>, output_pak: impl AsRef<Path>) -> Result<()> {
        Self::create_with_progress(source_dir, output_pak, &PackageOptions::default(), &|_| {})
    }

    /// Create a package from a directory with specified options
    ///
    /// # Errors
    ///
    /// See [`pack`].
    pub fn create_with_options(
        source_dir: impl AsRef<Path>,
        output_pak: impl AsRef<Path>,
        options: &PackageOptions,
    ) -> Result<()> {
        Self::create_with_progress(source_dir, output_pak, options, &|_| {})
    }

    /// Create a package from a directory with progress callback
    ///
    /// # Errors
    ///
    /// See [`pack`].
    pub fn create_with_progress(
        source_dir: impl AsRef<Path>,
        output_pak: impl AsRef<Path>,
        options: &PackageOptions,
        progress: ProgressCallback,
    ) -> Result<()> {
        let writer =
            PakWriter::new_with_progress(source_dir.as_ref(), options.clone(), progress)?;
        writer.write_with_progress(output_pak, progress)
    }
}

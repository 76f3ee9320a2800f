//! Batch package operations
//!
//! This module provides functions for batch extraction and creation,
//! including parallel processing and file discovery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use super::PakOperations;
use super::format::{PakPhase, PakProgress};
use super::options::PackageOptions;

/// Result of a batch operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchPakResult {
    /// Number of successful operations
    pub success_count: usize,
    /// Number of failed operations
    pub fail_count: usize,
    /// Messages for each archive processed, in input order
    pub results: Vec<String>,
}

/// Find all .pak files in a directory recursively
///
/// # Returns
/// A sorted list of paths to .pak files found in the directory tree.
pub fn find_pak_files<P: AsRef<Path>>(dir: P) -> Vec<PathBuf> {
    let mut pak_files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pak"))
        })
        .map(walkdir::DirEntry::into_path)
        .collect();

    pak_files.sort();
    pak_files
}

/// Find all packable folders (immediate subdirectories that contain files)
///
/// Each returned folder becomes one archive containing all its contents.
pub fn find_packable_folders<P: AsRef<Path>>(dir: P) -> Vec<PathBuf> {
    let mut folders: Vec<_> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_dir() && contains_files_recursive(e.path()))
        .map(walkdir::DirEntry::into_path)
        .collect();

    folders.sort();
    folders
}

/// Check if a directory contains any regular files (recursively)
fn contains_files_recursive(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .any(|e| e.file_type().is_file())
}

/// Batch extract archives in parallel
///
/// Each archive is extracted into a subdirectory of `dest_base` named after
/// the archive (without extension), preserving its location relative to
/// `source_base`.
pub fn batch_extract<F>(
    pak_files: &[PathBuf],
    source_base: &Path,
    dest_base: &Path,
    progress: F,
) -> BatchPakResult
where
    F: Fn(&PakProgress) + Send + Sync,
{
    let success_counter = AtomicUsize::new(0);
    let fail_counter = AtomicUsize::new(0);
    let processed = AtomicUsize::new(0);
    let total = pak_files.len();

    let results: Vec<String> = pak_files
        .par_iter()
        .map(|pak_path| {
            let relative_path = pak_path
                .strip_prefix(source_base)
                .unwrap_or(pak_path.as_path());
            let display_path = relative_path.to_string_lossy();

            let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(&PakProgress::with_file(
                PakPhase::DecompressingFiles,
                current,
                total,
                display_path.to_string(),
            ));

            let relative_parent = relative_path.parent().unwrap_or(Path::new(""));
            let pak_stem = pak_path.file_stem().unwrap_or_default();
            let pak_dest = dest_base.join(relative_parent).join(pak_stem);

            match PakOperations::extract(pak_path, &pak_dest) {
                Ok(summary) if summary.failed.is_empty() => {
                    success_counter.fetch_add(1, Ordering::SeqCst);
                    format!("Extracted: {display_path} ({} files)", summary.succeeded)
                }
                Ok(summary) => {
                    fail_counter.fetch_add(1, Ordering::SeqCst);
                    format!(
                        "Partially extracted {display_path}: {} of {} files failed",
                        summary.failed.len(),
                        summary.total()
                    )
                }
                Err(e) => {
                    fail_counter.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!("Failed to extract {display_path}: {e}");
                    format!("Failed {display_path}: {e}")
                }
            }
        })
        .collect();

    BatchPakResult {
        success_count: success_counter.load(Ordering::SeqCst),
        fail_count: fail_counter.load(Ordering::SeqCst),
        results,
    }
}

/// Batch create archives in parallel
///
/// Each folder is packed into `<folder name>.pak` under `dest_base`,
/// preserving its location relative to `source_base`.
pub fn batch_create<F>(
    folders: &[PathBuf],
    source_base: &Path,
    dest_base: &Path,
    options: &PackageOptions,
    progress: F,
) -> BatchPakResult
where
    F: Fn(&PakProgress) + Send + Sync,
{
    let success_counter = AtomicUsize::new(0);
    let fail_counter = AtomicUsize::new(0);
    let processed = AtomicUsize::new(0);
    let total = folders.len();

    let results: Vec<String> = folders
        .par_iter()
        .map(|folder_path| {
            let folder_name = folder_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let relative_path = folder_path
                .strip_prefix(source_base)
                .unwrap_or(folder_path.as_path());
            let display_path = relative_path.to_string_lossy();

            let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(&PakProgress::with_file(
                PakPhase::CompressingFiles,
                current,
                total,
                display_path.to_string(),
            ));

            let relative_parent = relative_path.parent().unwrap_or(Path::new(""));
            let pak_path = dest_base
                .join(relative_parent)
                .join(format!("{folder_name}.pak"));

            match PakOperations::create_with_options(folder_path, &pak_path, options) {
                Ok(()) => {
                    success_counter.fetch_add(1, Ordering::SeqCst);
                    format!("Created: {display_path}.pak")
                }
                Err(e) => {
                    fail_counter.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!("Failed to create {display_path}.pak: {e}");
                    format!("Failed {display_path}: {e}")
                }
            }
        })
        .collect();

    BatchPakResult {
        success_count: success_counter.load(Ordering::SeqCst),
        fail_count: fail_counter.load(Ordering::SeqCst),
        results,
    }
}

//! Extraction of package entries to disk
//!
//! Work is split into units: a non-solid entry on its own, or a solid block
//! together with every selected entry inside it. Units run in parallel and
//! each solid block is decompressed once no matter how many of its entries
//! are extracted.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use super::format::{PakPhase, PakProgress, PakReader, ProgressCallback, slice_solid_entry};
use super::index::Entry;
use super::options::{ExtractOptions, FailurePolicy};
use crate::error::{Error, ErrorKind, Result};

/// An entry that could not be extracted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntry {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of an extraction run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    /// Entries written and verified
    pub succeeded: usize,
    /// Entries that failed, sorted by path
    pub failed: Vec<FailedEntry>,
    /// Entries abandoned after cancellation
    pub skipped: usize,
}

impl ExtractionSummary {
    /// True when every selected entry was extracted.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0
    }

    /// Number of entries the run covered.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len() + self.skipped
    }
}

/// Unit of parallel work
enum Unit<'a> {
    Single(&'a Entry),
    Block(u32, Vec<&'a Entry>),
}

/// Shared state of one extraction run
struct Tally<'a> {
    options: &'a ExtractOptions,
    progress: ProgressCallback<'a>,
    total: usize,
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    skipped: AtomicUsize,
    abort: AtomicBool,
    failures: Mutex<Vec<FailedEntry>>,
    first_error: Mutex<Option<Error>>,
}

impl<'a> Tally<'a> {
    fn new(options: &'a ExtractOptions, progress: ProgressCallback<'a>, total: usize) -> Self {
        Self {
            options,
            progress,
            total,
            processed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
            first_error: Mutex::new(None),
        }
    }

    /// Whether the next entry should be abandoned
    fn should_stop(&self) -> bool {
        self.abort.load(Ordering::SeqCst) || self.options.is_cancelled()
    }

    fn tick(&self, entry: &Entry) {
        let current = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        (self.progress)(&PakProgress::with_file(
            PakPhase::DecompressingFiles,
            current,
            self.total,
            entry.path.clone(),
        ));
    }

    fn skip(&self, count: usize) {
        self.skipped.fetch_add(count, Ordering::SeqCst);
    }

    fn record(&self, entry: &Entry, result: Result<()>) {
        let error = match result {
            Ok(()) => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Err(e) => e,
        };

        tracing::warn!("Failed to extract {}: {}", entry.path, error);
        match self.options.policy {
            FailurePolicy::FailFast => {
                self.abort.store(true, Ordering::SeqCst);
                let mut first = self
                    .first_error
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if first.is_none() {
                    *first = Some(error);
                }
            }
            FailurePolicy::BestEffort => {
                self.push_failure(entry, error.kind(), error.to_string());
            }
        }
    }

    /// Record a failure that shares its cause with an already recorded one.
    fn record_shared(&self, entry: &Entry, kind: ErrorKind, message: &str) {
        match self.options.policy {
            FailurePolicy::FailFast => self.abort.store(true, Ordering::SeqCst),
            FailurePolicy::BestEffort => self.push_failure(entry, kind, message.to_string()),
        }
    }

    fn push_failure(&self, entry: &Entry, kind: ErrorKind, message: String) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(FailedEntry {
                path: entry.path.clone(),
                kind,
                message,
            });
    }

    fn finish(self) -> Result<ExtractionSummary> {
        let first = self
            .first_error
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(error) = first {
            return Err(error);
        }

        let mut failed = self
            .failures
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        failed.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(ExtractionSummary {
            succeeded: self.succeeded.into_inner(),
            failed,
            skipped: self.skipped.into_inner(),
        })
    }
}

/// Write verified bytes to `destination`, creating parent directories.
fn write_output(destination: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::write_failed(parent, e))?;
    }
    std::fs::write(destination, data).map_err(|e| Error::write_failed(destination, e))
}

impl PakReader {
    /// Extract every entry under `dest`.
    ///
    /// # Errors
    /// Returns [`Error::WriteFailed`] if `dest` cannot be created. Per-entry
    /// failures are collected into the summary, or returned as the error
    /// under [`FailurePolicy::FailFast`].
    pub fn extract_all(
        &self,
        dest: impl AsRef<Path>,
        options: &ExtractOptions,
    ) -> Result<ExtractionSummary> {
        self.extract_all_with_progress(dest, options, &|_| {})
    }

    /// Extract every entry under `dest` with progress callback
    pub fn extract_all_with_progress(
        &self,
        dest: impl AsRef<Path>,
        options: &ExtractOptions,
        progress: ProgressCallback,
    ) -> Result<ExtractionSummary> {
        let selected: Vec<&Entry> = self.iter_all().collect();
        self.extract_entries(dest.as_ref(), &selected, options, progress)
    }

    /// Extract only the named entries under `dest`.
    ///
    /// Paths are matched like [`PakReader::lookup`]. Requesting the same entry
    /// twice extracts it once.
    ///
    /// # Errors
    /// Returns [`Error::EntryNotFound`] for the first requested path that is
    /// not in the package; nothing is extracted in that case.
    pub fn extract_files<S: AsRef<str>>(
        &self,
        dest: impl AsRef<Path>,
        paths: &[S],
        options: &ExtractOptions,
    ) -> Result<ExtractionSummary> {
        let mut wanted = HashSet::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let entry = self
                .lookup(path)
                .ok_or_else(|| Error::EntryNotFound(path.to_string()))?;
            wanted.insert(entry.path.as_str());
        }

        let selected: Vec<&Entry> = self
            .iter_all()
            .filter(|e| wanted.contains(e.path.as_str()))
            .collect();
        self.extract_entries(dest.as_ref(), &selected, options, &|_| {})
    }

    /// Extract a single entry to exactly `destination_path`.
    ///
    /// # Errors
    /// Returns [`Error::EntryNotFound`] if the path is not in the package.
    pub fn extract_one(&self, path: &str, destination_path: impl AsRef<Path>) -> Result<()> {
        let entry = self
            .lookup(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_string()))?;
        let data = self.entry_data(entry)?;
        write_output(destination_path.as_ref(), &data)
    }

    fn extract_entries(
        &self,
        dest: &Path,
        selected: &[&Entry],
        options: &ExtractOptions,
        progress: ProgressCallback,
    ) -> Result<ExtractionSummary> {
        std::fs::create_dir_all(dest).map_err(|e| Error::write_failed(dest, e))?;

        tracing::info!(
            "Extracting {} entries to {}",
            selected.len(),
            dest.display()
        );

        let units = plan_units(selected);
        let tally = Tally::new(options, progress, selected.len());

        units.par_iter().for_each(|unit| match unit {
            Unit::Single(entry) => {
                if tally.should_stop() {
                    tally.skip(1);
                    return;
                }
                tally.tick(entry);
                let result = self
                    .read_stored_entry(entry)
                    .and_then(|data| write_output(&dest.join(&entry.path), &data));
                tally.record(entry, result);
            }
            Unit::Block(id, members) => self.extract_block(*id, members, dest, &tally),
        });

        let summary = tally.finish()?;
        progress(&PakProgress::new(
            PakPhase::Complete,
            summary.total(),
            summary.total(),
        ));

        if summary.failed.is_empty() {
            tracing::info!("Extracted {} entries", summary.succeeded);
        } else {
            tracing::warn!(
                "Extracted {} entries, {} failed",
                summary.succeeded,
                summary.failed.len()
            );
        }
        if summary.skipped > 0 {
            tracing::info!("Extraction cancelled, {} entries skipped", summary.skipped);
        }

        Ok(summary)
    }

    fn extract_block(&self, id: u32, members: &[&Entry], dest: &Path, tally: &Tally) {
        if tally.should_stop() {
            tally.skip(members.len());
            return;
        }

        let block = match self.decompress_block(id) {
            Ok(block) => block,
            Err(error) => {
                // Every member of an undecodable block fails the same way
                let (kind, message) = (error.kind(), error.to_string());
                tracing::warn!("Failed to decode solid block {id}: {message}");
                let mut first = Some(error);
                for entry in members {
                    tally.tick(entry);
                    match first.take() {
                        Some(error) => tally.record(entry, Err(error)),
                        None => tally.record_shared(entry, kind, &message),
                    }
                }
                return;
            }
        };

        for (i, entry) in members.iter().enumerate() {
            if tally.should_stop() {
                tally.skip(members.len() - i);
                return;
            }
            tally.tick(entry);
            let result = slice_solid_entry(&block, entry)
                .and_then(|data| write_output(&dest.join(&entry.path), data));
            tally.record(entry, result);
        }
    }
}

/// Group selected entries into work units, keeping index order.
fn plan_units<'a>(selected: &[&'a Entry]) -> Vec<Unit<'a>> {
    let mut units = Vec::new();
    let mut blocks: BTreeMap<u32, Vec<&'a Entry>> = BTreeMap::new();

    for &entry in selected {
        match entry.block {
            None => units.push(Unit::Single(entry)),
            Some(id) => blocks.entry(id).or_default().push(entry),
        }
    }

    units.extend(blocks.into_iter().map(|(id, members)| Unit::Block(id, members)));
    units
}

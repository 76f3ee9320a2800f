//! Error types for `PakCore`

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// The error type for `PakCore` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error while reading an archive or a source file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing an output file failed.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        /// The file that was being written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    // ==================== Archive Structure Errors ====================
    /// The header is truncated or its magic bytes/fields are invalid.
    #[error("malformed PAK header: {message}")]
    MalformedHeader {
        /// Description of what is invalid.
        message: String,
    },

    /// The archive declares a format version this library cannot read.
    #[error("unsupported PAK version: {version} (supported: {min}-{max})")]
    UnsupportedVersion {
        /// The version number found in the file.
        version: u32,
        /// Oldest supported version.
        min: u32,
        /// Newest supported version.
        max: u32,
    },

    /// The index is truncated or references inconsistent offsets.
    #[error("malformed PAK index at byte {offset}: {message}")]
    MalformedIndex {
        /// Byte offset (within the archive) near where the problem was found.
        offset: u64,
        /// Description of what is invalid.
        message: String,
    },

    /// PAK contains too many files to index.
    #[error("PAK contains too many files: {count}")]
    PakTooManyFiles {
        /// The number of files.
        count: usize,
    },

    // ==================== Entry Errors ====================
    /// The requested file was not found in the PAK archive.
    #[error("file not found in PAK: {0}")]
    EntryNotFound(String),

    /// An entry's content does not match its recorded checksum.
    #[error("checksum mismatch for {path}: expected {expected:08x}, found {actual:08x}")]
    ChecksumMismatch {
        /// Path of the entry inside the archive.
        path: String,
        /// Checksum recorded in the index.
        expected: u32,
        /// Checksum of the extracted content.
        actual: u32,
    },

    /// Compressed data could not be decoded or decoded to the wrong size.
    #[error("corrupt data in {}: {message}", .entry.as_deref().unwrap_or("compressed stream"))]
    CorruptData {
        /// Entry the data belongs to, when known.
        entry: Option<String>,
        /// Description of the failure.
        message: String,
    },

    /// Two source files normalize to the same archive path.
    #[error("duplicate entry {path} (conflicts with {existing})")]
    DuplicateEntry {
        /// The normalized path being added.
        path: String,
        /// The previously added path with the same key.
        existing: String,
    },

    // ==================== Creation Errors ====================
    /// The source directory does not exist.
    #[error("source directory not found: {}", path.display())]
    SourceNotFound {
        /// The missing directory.
        path: PathBuf,
    },

    /// The source directory contains no files.
    #[error("source directory contains no files: {}", path.display())]
    EmptySource {
        /// The empty directory.
        path: PathBuf,
    },

    /// Package options failed validation.
    #[error("invalid package options: {message}")]
    InvalidOptions {
        /// The validation error message.
        message: String,
    },

    // ==================== File System Errors ====================
    /// Invalid file path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Directory traversal error.
    #[error("directory walk error: {0}")]
    WalkDirError(String),
}

impl Error {
    pub(crate) fn malformed_header(message: impl Into<String>) -> Self {
        Error::MalformedHeader {
            message: message.into(),
        }
    }

    pub(crate) fn malformed_index(offset: u64, message: impl Into<String>) -> Self {
        Error::MalformedIndex {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Error::CorruptData {
            entry: None,
            message: message.into(),
        }
    }

    pub(crate) fn write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::WriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Attach an entry path to a codec error that was raised without one.
    #[must_use]
    pub(crate) fn for_entry(self, path: &str) -> Self {
        match self {
            Error::CorruptData {
                entry: None,
                message,
            } => Error::CorruptData {
                entry: Some(path.to_string()),
                message,
            },
            other => other,
        }
    }

    /// The taxonomy kind of this error, as reported in extraction summaries.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::WalkDirError(_) => ErrorKind::IoRead,
            Error::WriteFailed { .. } => ErrorKind::IoWrite,
            Error::MalformedHeader { .. } => ErrorKind::MalformedHeader,
            Error::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Error::MalformedIndex { .. } | Error::PakTooManyFiles { .. } => {
                ErrorKind::MalformedIndex
            }
            Error::EntryNotFound(_) => ErrorKind::EntryNotFound,
            Error::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Error::CorruptData { .. } => ErrorKind::CorruptData,
            Error::DuplicateEntry { .. } => ErrorKind::DuplicateEntry,
            Error::SourceNotFound { .. } => ErrorKind::SourceNotFound,
            Error::EmptySource { .. } => ErrorKind::EmptySource,
            Error::InvalidOptions { .. } => ErrorKind::InvalidOptions,
            Error::InvalidPath(_) => ErrorKind::InvalidPath,
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::WalkDirError(err.to_string())
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    MalformedHeader,
    UnsupportedVersion,
    MalformedIndex,
    EntryNotFound,
    ChecksumMismatch,
    CorruptData,
    DuplicateEntry,
    SourceNotFound,
    EmptySource,
    IoWrite,
    IoRead,
    InvalidOptions,
    InvalidPath,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A specialized Result type for `PakCore` operations.
pub type Result<T> = std::result::Result<T, Error>;

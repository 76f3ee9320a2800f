//! Package archive operations module

mod batch;
mod extract;
pub mod format;
pub mod index;
mod operations;
pub mod options;

// Primary public API
pub use crate::compression::CompressionMethod;
pub use operations::{PakOperations, pack, unpack};

pub use extract::{ExtractionSummary, FailedEntry};
pub use format::{PakHeader, PakInfo, PakPhase, PakProgress, PakReader, PakWriter, ProgressCallback};
pub use index::{Entry, EntrySource, IndexBuilder, PackIndex, SolidBlock};
pub use options::{
    ExtractOptions, FailurePolicy, PackageFlags, PackageOptions, PackageOptionsBuilder,
    PackageVersion,
};

// Re-export batch operations
pub use batch::{
    BatchPakResult, batch_create, batch_extract, find_packable_folders, find_pak_files,
};

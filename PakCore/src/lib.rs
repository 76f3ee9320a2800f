//! # PakCore
//!
//! A pure-Rust library for solid, compressed, memory-mappable game package
//! archives.
//!
//! A package is a single file holding a directory tree: a fixed header, the
//! stored file contents (compressed one by one, or concatenated into solid
//! blocks that are compressed together), and an index with every entry's
//! path, sizes, location and CRC-32. Readers validate the header and index up
//! front and verify every entry's checksum on extraction.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pakcore::pak::{PackageOptions, PakOperations};
//!
//! // Pack a directory with the defaults (solid LZ4, newest format version)
//! pakcore::pack("Mods/MyMod", "MyMod.pak", &PackageOptions::default())?;
//!
//! // List and unpack it again
//! let files = PakOperations::list("MyMod.pak")?;
//! println!("Found {} files", files.len());
//!
//! let summary = pakcore::unpack("MyMod.pak", "output/")?;
//! assert!(summary.failed.is_empty());
//!
//! // Read a specific file without extracting
//! let data = PakOperations::read_file_bytes("MyMod.pak", "Mods/MyMod/meta.lsx")?;
//! # Ok::<(), pakcore::Error>(())
//! ```
//!
//! ### Using the Prelude
//!
//! ```
//! use pakcore::prelude::*;
//!
//! let options = PackageOptions::builder()
//!     .compression(CompressionMethod::Zlib)
//!     .solid(false)
//!     .priority(30)
//!     .build()?;
//! assert!(!options.is_solid());
//! # Ok::<(), pakcore::Error>(())
//! ```

pub mod compression;
pub mod error;
pub mod pak;
pub mod utils;

// Re-exports for convenience
pub use error::{Error, ErrorKind, Result};
pub use pak::{pack, unpack};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::compression::CompressionMethod;
    pub use crate::error::{Error, ErrorKind, Result};

    pub use crate::pak::{
        ExtractOptions, ExtractionSummary, FailurePolicy, PackageFlags, PackageOptions,
        PackageVersion, PakOperations, PakReader, PakWriter, pack, unpack,
    };

    pub use crate::pak::{
        BatchPakResult, batch_create, batch_extract, find_packable_folders, find_pak_files,
    };
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

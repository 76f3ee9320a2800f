//! Package creation and extraction options
//!
//! [`PackageOptions`] is an immutable record built once through
//! [`PackageOptionsBuilder`]; every field is validated at construction.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};

use crate::compression::CompressionMethod;
use crate::error::{Error, Result};

/// Default upper bound of a single solid block (uncompressed bytes)
pub const DEFAULT_SOLID_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Package format revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum PackageVersion {
    /// Independently compressed entries only
    V1,
    /// Adds solid blocks
    #[default]
    V2,
}

impl PackageVersion {
    /// Version number written to the header
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            PackageVersion::V1 => 1,
            PackageVersion::V2 => 2,
        }
    }

    #[must_use]
    pub fn from_u32(version: u32) -> Option<Self> {
        match version {
            1 => Some(PackageVersion::V1),
            2 => Some(PackageVersion::V2),
            _ => None,
        }
    }

    /// Whether this revision can store solid blocks
    #[must_use]
    pub fn supports_solid(self) -> bool {
        self >= PackageVersion::V2
    }
}

/// Package flag bit set
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PackageFlags(u8);

impl PackageFlags {
    /// Entries are compressed together in shared blocks
    pub const SOLID: Self = Self(0x01);
    /// Readers may memory-map the archive
    pub const ALLOW_MEMORY_MAPPING: Self = Self(0x02);
    /// Hint that the package should be loaded eagerly
    pub const PRELOAD: Self = Self(0x04);

    const ALL_BITS: u8 = 0x07;

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn all() -> Self {
        Self(Self::ALL_BITS)
    }

    /// Build flags from raw bits, rejecting bits outside the defined set.
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !Self::ALL_BITS != 0 {
            return Err(Error::InvalidOptions {
                message: format!("unknown package flag bits: {:#04x}", bits & !Self::ALL_BITS),
            });
        }
        Ok(Self(bits))
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl std::ops::BitOr for PackageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for PackageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::SOLID) {
            names.push("SOLID");
        }
        if self.contains(Self::ALLOW_MEMORY_MAPPING) {
            names.push("ALLOW_MEMORY_MAPPING");
        }
        if self.contains(Self::PRELOAD) {
            names.push("PRELOAD");
        }
        if names.is_empty() {
            write!(f, "PackageFlags(empty)")
        } else {
            write!(f, "PackageFlags({})", names.join(" | "))
        }
    }
}

/// Options controlling how a package is written.
///
/// Defaults match what the game's own tooling produces: newest version, LZ4,
/// `SOLID | ALLOW_MEMORY_MAPPING | PRELOAD`, priority 0.
///
/// # Example
///
/// ```
/// use pakcore::pak::{CompressionMethod, PackageFlags, PackageOptions};
///
/// let options = PackageOptions::builder()
///     .compression(CompressionMethod::Zlib)
///     .flags(PackageFlags::PRELOAD)
///     .priority(30)
///     .build()?;
/// assert_eq!(options.priority(), 30);
/// # Ok::<(), pakcore::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPackageOptions", into = "RawPackageOptions")]
pub struct PackageOptions {
    version: PackageVersion,
    compression: CompressionMethod,
    fast_compression: bool,
    flags: PackageFlags,
    priority: u8,
    solid_block_size: usize,
    allow_empty: bool,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            version: PackageVersion::default(),
            compression: CompressionMethod::Lz4,
            fast_compression: false,
            flags: PackageFlags::SOLID | PackageFlags::ALLOW_MEMORY_MAPPING | PackageFlags::PRELOAD,
            priority: 0,
            solid_block_size: DEFAULT_SOLID_BLOCK_SIZE,
            allow_empty: false,
        }
    }
}

impl PackageOptions {
    /// Start building options from the defaults.
    #[must_use]
    pub fn builder() -> PackageOptionsBuilder {
        PackageOptionsBuilder::default()
    }

    #[must_use]
    pub fn version(&self) -> PackageVersion {
        self.version
    }

    #[must_use]
    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    #[must_use]
    pub fn fast_compression(&self) -> bool {
        self.fast_compression
    }

    #[must_use]
    pub fn flags(&self) -> PackageFlags {
        self.flags
    }

    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub fn solid_block_size(&self) -> usize {
        self.solid_block_size
    }

    #[must_use]
    pub fn allow_empty(&self) -> bool {
        self.allow_empty
    }

    #[must_use]
    pub fn is_solid(&self) -> bool {
        self.flags.contains(PackageFlags::SOLID)
    }
}

/// Builder for [`PackageOptions`].
#[derive(Debug, Clone)]
pub struct PackageOptionsBuilder {
    version: PackageVersion,
    compression: CompressionMethod,
    fast_compression: bool,
    flags: PackageFlags,
    priority: u32,
    solid_block_size: usize,
    allow_empty: bool,
}

impl Default for PackageOptionsBuilder {
    fn default() -> Self {
        let defaults = PackageOptions::default();
        Self {
            version: defaults.version,
            compression: defaults.compression,
            fast_compression: defaults.fast_compression,
            flags: defaults.flags,
            priority: u32::from(defaults.priority),
            solid_block_size: defaults.solid_block_size,
            allow_empty: defaults.allow_empty,
        }
    }
}

impl PackageOptionsBuilder {
    #[must_use]
    pub fn version(mut self, version: PackageVersion) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn fast_compression(mut self, fast: bool) -> Self {
        self.fast_compression = fast;
        self
    }

    /// Replace the whole flag set.
    #[must_use]
    pub fn flags(mut self, flags: PackageFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Turn the `SOLID` flag on or off.
    #[must_use]
    pub fn solid(mut self, solid: bool) -> Self {
        self.flags = if solid {
            self.flags | PackageFlags::SOLID
        } else {
            self.flags.difference(PackageFlags::SOLID)
        };
        self
    }

    /// Load-order priority, 0-255. Checked in [`build`](Self::build).
    #[must_use]
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn solid_block_size(mut self, size: usize) -> Self {
        self.solid_block_size = size;
        self
    }

    #[must_use]
    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }

    /// Validate and produce the options.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOptions`] if the priority is above 255, the
    /// solid block size is zero, or `SOLID` is requested with a version that
    /// cannot store solid blocks.
    pub fn build(self) -> Result<PackageOptions> {
        let priority = u8::try_from(self.priority).map_err(|_| Error::InvalidOptions {
            message: format!("priority {} out of range 0-255", self.priority),
        })?;

        if self.solid_block_size == 0 {
            return Err(Error::InvalidOptions {
                message: "solid block size must be non-zero".to_string(),
            });
        }

        if self.flags.contains(PackageFlags::SOLID) && !self.version.supports_solid() {
            return Err(Error::InvalidOptions {
                message: format!("{:?} packages cannot be solid", self.version),
            });
        }

        Ok(PackageOptions {
            version: self.version,
            compression: self.compression,
            fast_compression: self.fast_compression,
            flags: self.flags,
            priority,
            solid_block_size: self.solid_block_size,
            allow_empty: self.allow_empty,
        })
    }
}

/// Serialized form of [`PackageOptions`]; deserialization goes through the builder.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct RawPackageOptions {
    version: PackageVersion,
    compression: CompressionMethod,
    fast_compression: bool,
    solid: bool,
    allow_memory_mapping: bool,
    preload: bool,
    priority: u32,
    solid_block_size: usize,
    allow_empty: bool,
}

impl Default for RawPackageOptions {
    fn default() -> Self {
        PackageOptions::default().into()
    }
}

impl From<PackageOptions> for RawPackageOptions {
    fn from(options: PackageOptions) -> Self {
        Self {
            version: options.version,
            compression: options.compression,
            fast_compression: options.fast_compression,
            solid: options.flags.contains(PackageFlags::SOLID),
            allow_memory_mapping: options.flags.contains(PackageFlags::ALLOW_MEMORY_MAPPING),
            preload: options.flags.contains(PackageFlags::PRELOAD),
            priority: u32::from(options.priority),
            solid_block_size: options.solid_block_size,
            allow_empty: options.allow_empty,
        }
    }
}

impl TryFrom<RawPackageOptions> for PackageOptions {
    type Error = Error;

    fn try_from(raw: RawPackageOptions) -> Result<Self> {
        let mut flags = PackageFlags::empty();
        if raw.solid {
            flags = flags | PackageFlags::SOLID;
        }
        if raw.allow_memory_mapping {
            flags = flags | PackageFlags::ALLOW_MEMORY_MAPPING;
        }
        if raw.preload {
            flags = flags | PackageFlags::PRELOAD;
        }

        PackageOptions::builder()
            .version(raw.version)
            .compression(raw.compression)
            .fast_compression(raw.fast_compression)
            .flags(flags)
            .priority(raw.priority)
            .solid_block_size(raw.solid_block_size)
            .allow_empty(raw.allow_empty)
            .build()
    }
}

/// What extraction does when a single entry fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure in the summary and continue
    #[default]
    BestEffort,
    /// Stop at the first failed entry and return its error
    FailFast,
}

/// Options for extraction operations.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Per-entry failure handling
    pub policy: FailurePolicy,
    /// When set to `true`, remaining entries are abandoned (checked per entry)
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ExtractOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop at the first failing entry.
    #[must_use]
    pub fn fail_fast() -> Self {
        Self {
            policy: FailurePolicy::FailFast,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(std::sync::atomic::Ordering::Relaxed))
    }
}

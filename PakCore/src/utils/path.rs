//! Path utilities

use std::path::Path;

use crate::error::{Error, Result};

/// Normalize an archive path: forward slashes, no empty or `.` components.
///
/// Absolute paths, drive prefixes and `..` components are rejected so that an
/// entry can never resolve outside the extraction directory.
pub fn normalize_path(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(Error::InvalidPath(format!("absolute path: {path}")));
    }

    let mut parts = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => {}
            ".." => return Err(Error::InvalidPath(format!("parent traversal: {path}"))),
            c if parts.is_empty() && c.len() == 2 && c.ends_with(':') => {
                return Err(Error::InvalidPath(format!("drive prefix: {path}")));
            }
            c => parts.push(c),
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidPath(format!("empty path: {path:?}")));
    }

    Ok(parts.join("/"))
}

/// Lookup key for a normalized path (case-insensitive).
pub fn path_key(normalized: &str) -> String {
    normalized.to_lowercase()
}

/// Get relative path and normalize separators
pub fn relative_path(path: &Path, base: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| Error::InvalidPath(path.display().to_string()))?;
    let relative = relative
        .to_str()
        .ok_or_else(|| Error::InvalidPath(format!("non UTF-8 path: {}", relative.display())))?;
    normalize_path(relative)
}

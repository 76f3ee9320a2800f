//! Utility functions

pub mod path;

pub use path::{normalize_path, path_key};

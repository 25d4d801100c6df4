#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the durable event list.
//!
//! All paths are relative to the project root's `data/` directory.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`; falls back to the
/// current directory when the manifest sits at the filesystem root.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the default path of the durable event list.
#[must_use]
pub fn default_events_path() -> PathBuf {
    data_dir().join("events.json")
}

/// Returns the temporary sibling used for atomic overwrites of `path`.
#[must_use]
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

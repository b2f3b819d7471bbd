//! Filesystem utilities

use std::fs;
use std::path::Path;

/// Create a directory and all parent directories if they don't exist
pub fn create_dir_all(path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Make sure the directory an output file will be written into exists
pub fn ensure_parent_dir(file_path: impl AsRef<Path>) -> std::io::Result<()> {
    match file_path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => create_dir_all(parent),
        _ => Ok(()),
    }
}

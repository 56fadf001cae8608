//! Permanent removal of expired holding-area items.

use std::fs;
use std::io;
use std::path::Path;

use expirito_core::ItemError;

/// Permanently remove a file or symlink. Returns the bytes freed.
///
/// Directories are never removed here; they are pruned once empty.
pub fn remove_item(path: &Path) -> Result<u64, ItemError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| ItemError::io(path, e))?;
    if metadata.is_dir() {
        return Err(ItemError::Io {
            path: path.to_path_buf(),
            source: io::Error::other("directories are pruned, not removed"),
        });
    }

    fs::remove_file(path).map_err(|e| ItemError::io(path, e))?;
    Ok(metadata.len())
}

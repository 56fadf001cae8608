//! Filesystem items visited by a sweep.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::config::TimestampBasis;

/// Type of filesystem entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ItemKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link. The link itself is the item; targets are never followed.
    Symlink,
    /// Other file types (FIFOs, sockets, devices). Never opened or moved.
    Other,
}

impl ItemKind {
    /// Classify a file type without following symlinks.
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

/// A filesystem entry found by traversal.
///
/// Items are recomputed on every run and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Entry type.
    pub kind: ItemKind,
    /// Last modification time.
    pub modified: SystemTime,
    /// Last access time (if available).
    pub accessed: Option<SystemTime>,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Device the entry lives on.
    pub device: u64,
    /// Depth below the traversal root (root = 0).
    pub depth: usize,
}

impl Item {
    /// Timestamp used for age classification.
    ///
    /// Falls back to the modification time when access times are unavailable.
    pub fn timestamp(&self, basis: TimestampBasis) -> SystemTime {
        match basis {
            TimestampBasis::Modified => self.modified,
            TimestampBasis::Accessed => self.accessed.unwrap_or(self.modified),
        }
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Directory
    }

    /// Path as a borrowed reference.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

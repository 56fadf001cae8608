//! Bottom-up removal of empty directories.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use globset::GlobSet;
use tracing::{debug, warn};

/// Outcome of pruning one root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Directories removed, children before parents.
    pub pruned: Vec<PathBuf>,
    /// Empty directories that could not be removed, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

impl PruneReport {
    /// Whether nothing was pruned or skipped.
    pub fn is_empty(&self) -> bool {
        self.pruned.is_empty() && self.skipped.is_empty()
    }
}

/// Removes directories left with no entries.
///
/// Traversal is post-order: a directory is evaluated only after all of its
/// subdirectories have been processed. The root passed to [`prune`] is
/// never removed. Symlinks count as entries and are never followed, and so
/// do excluded entries.
///
/// [`prune`]: EmptyDirPruner::prune
#[derive(Debug, Clone, Default)]
pub struct EmptyDirPruner {
    dry_run: bool,
    assumed_gone: HashSet<PathBuf>,
    protected: Vec<PathBuf>,
    exclude: Option<GlobSet>,
}

impl EmptyDirPruner {
    /// Create a pruner that removes directories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pruner that removes nothing.
    ///
    /// `assumed_gone` lists entries the caller would have removed; a
    /// directory holding only such entries is reported as pruned.
    pub fn dry_run(assumed_gone: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            dry_run: true,
            assumed_gone: assumed_gone.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Never enter or remove the given directory.
    pub fn protect(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected.push(path.into());
        self
    }

    /// Never enter or remove entries matching these globs, by name or by
    /// path relative to the pruned root.
    pub fn with_exclude(mut self, exclude: GlobSet) -> Self {
        self.exclude = Some(exclude);
        self
    }

    /// Prune every empty directory below `root`.
    pub fn prune(&self, root: &Path) -> PruneReport {
        let mut report = PruneReport::default();

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Cannot read root for pruning");
                return report;
            }
        };

        for entry in entries.flatten() {
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                self.prune_dir(root, &entry.path(), &mut report);
            }
        }

        debug!(
            root = %root.display(),
            pruned = report.pruned.len(),
            skipped = report.skipped.len(),
            "Prune complete"
        );
        report
    }

    /// Process one directory. Returns whether it is gone afterwards.
    fn prune_dir(&self, root: &Path, dir: &Path, report: &mut PruneReport) -> bool {
        if self.is_kept(root, dir) {
            return false;
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                report.skipped.push((dir.to_path_buf(), e.to_string()));
                return false;
            }
        };

        let mut remaining = 0usize;
        for entry in entries {
            let Ok(entry) = entry else {
                remaining += 1;
                continue;
            };
            let path = entry.path();
            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());

            if is_dir && self.prune_dir(root, &path, report) {
                continue;
            }
            if self.dry_run && self.assumed_gone.contains(&path) {
                continue;
            }
            remaining += 1;
        }

        if remaining > 0 {
            return false;
        }

        if self.dry_run {
            report.pruned.push(dir.to_path_buf());
            return true;
        }

        match fs::remove_dir(dir) {
            Ok(()) => {
                report.pruned.push(dir.to_path_buf());
                true
            }
            Err(e) => {
                report.skipped.push((dir.to_path_buf(), e.to_string()));
                false
            }
        }
    }

    fn is_kept(&self, root: &Path, dir: &Path) -> bool {
        if self.protected.iter().any(|p| p == dir) {
            return true;
        }
        let Some(exclude) = &self.exclude else {
            return false;
        };
        let relative = dir.strip_prefix(root).unwrap_or(dir);
        exclude.is_match(relative) || dir.file_name().is_some_and(|name| exclude.is_match(name))
    }
}

/// Prune every empty directory below `root`, keeping `root` itself.
pub fn prune(root: &Path) -> PruneReport {
    EmptyDirPruner::new().prune(root)
}

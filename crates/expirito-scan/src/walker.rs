//! JWalk-based traversal producing items in post-order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use globset::GlobSet;
use jwalk::{Parallelism, WalkDir};
use tracing::debug;

use expirito_core::{Item, ItemError, ItemKind};

/// Options for one traversal.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Entries matching these globs (by name or root-relative path) are not visited.
    pub exclude: GlobSet,
    /// Subtrees that are never entered (the holding area, when nested).
    pub skip: Vec<PathBuf>,
    /// Number of threads for directory reads (0 = rayon default pool, 1 = serial).
    pub threads: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl WalkOptions {
    /// Serial traversal with no exclusions.
    pub fn new() -> Self {
        Self {
            exclude: GlobSet::empty(),
            skip: Vec::new(),
            threads: 1,
        }
    }

    /// Set exclude patterns.
    pub fn with_exclude(mut self, exclude: GlobSet) -> Self {
        self.exclude = exclude;
        self
    }

    /// Never enter the given subtree.
    pub fn skip_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.skip.push(path.into());
        self
    }

    /// Set the traversal thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }
}

/// An entry that could not be read during traversal.
#[derive(Debug)]
pub struct WalkFailure {
    /// Path of the unreadable entry.
    pub path: PathBuf,
    /// Entry type, when known.
    pub kind: ItemKind,
    /// What went wrong.
    pub error: ItemError,
}

/// Result of walking one root.
#[derive(Debug)]
pub struct Traversal {
    /// The traversal root.
    pub root: PathBuf,
    /// Every entry below the root, children before their parent.
    pub items: Vec<Item>,
    /// Entries that could not be read.
    pub failures: Vec<WalkFailure>,
}

impl Traversal {
    /// Number of files and symlinks visited.
    pub fn leaf_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_dir()).count()
    }

    /// Number of directories visited (root excluded).
    pub fn dir_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_dir()).count()
    }
}

/// Walk `root` and return its entries in post-order.
///
/// The root itself is never part of the result. Symlinks are reported as
/// leaves and never followed.
pub fn walk(root: &Path, options: &WalkOptions) -> Result<Traversal, ItemError> {
    let root_metadata = std::fs::metadata(root).map_err(|e| ItemError::io(root, e))?;
    if !root_metadata.is_dir() {
        return Err(ItemError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
        ));
    }

    let parallelism = match options.threads {
        0 => Parallelism::RayonDefaultPool {
            busy_timeout: std::time::Duration::from_millis(100),
        },
        1 => Parallelism::Serial,
        n => Parallelism::RayonNewPool(n),
    };

    let filter_root = root.to_path_buf();
    let exclude = options.exclude.clone();
    let skip = options.skip.clone();

    let walker = WalkDir::new(root)
        .parallelism(parallelism)
        .sort(true)
        .skip_hidden(false)
        .follow_links(false)
        .process_read_dir(move |_depth, _dir, _state, children| {
            children.retain(|child| match child {
                Ok(entry) => {
                    let path = entry.path();
                    if skip.iter().any(|s| path.starts_with(s)) {
                        return false;
                    }
                    let relative = path.strip_prefix(&filter_root).unwrap_or(path.as_path());
                    !(exclude.is_match(relative) || exclude.is_match(entry.file_name()))
                }
                Err(_) => true,
            });
        });

    let mut entries_by_parent: HashMap<PathBuf, Vec<Item>> = HashMap::new();
    let mut failures = Vec::new();

    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                failures.push(walk_failure(&err));
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let kind = ItemKind::from_file_type(entry.file_type());

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                let mut failure = walk_failure(&err);
                failure.path = path;
                failure.kind = kind;
                failures.push(failure);
                continue;
            }
        };

        let item = Item {
            kind,
            modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            accessed: metadata.accessed().ok(),
            size: match kind {
                ItemKind::File | ItemKind::Symlink => metadata.len(),
                ItemKind::Directory | ItemKind::Other => 0,
            },
            device: device_id(&metadata),
            depth: entry.depth(),
            path: path.clone(),
        };

        if let Some(parent) = path.parent() {
            entries_by_parent
                .entry(parent.to_path_buf())
                .or_default()
                .push(item);
        }
    }

    let mut items = Vec::new();
    emit_post_order(root, &mut entries_by_parent, &mut items);

    debug!(
        root = %root.display(),
        items = items.len(),
        failures = failures.len(),
        "Traversal complete"
    );

    Ok(Traversal {
        root: root.to_path_buf(),
        items,
        failures,
    })
}

/// Emit the subtree under `dir`, each child after its own descendants.
fn emit_post_order(
    dir: &Path,
    entries_by_parent: &mut HashMap<PathBuf, Vec<Item>>,
    out: &mut Vec<Item>,
) {
    let children = entries_by_parent.remove(dir).unwrap_or_default();
    for child in children {
        if child.is_dir() {
            emit_post_order(&child.path, entries_by_parent, out);
        }
        out.push(child);
    }
}

fn walk_failure(err: &jwalk::Error) -> WalkFailure {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let source = match err.io_error() {
        Some(io) => std::io::Error::new(io.kind(), io.to_string()),
        None => std::io::Error::other(err.to_string()),
    };
    // jwalk only fails on reads of directory contents, but the entry itself
    // may since have been replaced
    let kind = std::fs::symlink_metadata(&path)
        .map(|m| ItemKind::from_file_type(m.file_type()))
        .unwrap_or(ItemKind::Directory);
    WalkFailure {
        error: ItemError::io(&path, source),
        path,
        kind,
    }
}

// Cross-platform metadata helpers

/// Get the device ID from metadata.
#[cfg(unix)]
pub fn device_id(metadata: &std::fs::Metadata) -> u64 {
    metadata.dev()
}

#[cfg(not(unix))]
pub fn device_id(_metadata: &std::fs::Metadata) -> u64 {
    0 // Windows doesn't have device IDs in the same way
}

/// Get the device ID of a path without following a final symlink.
pub fn path_device(path: &Path) -> std::io::Result<u64> {
    std::fs::symlink_metadata(path).map(|m| device_id(&m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use globset::{Glob, GlobSetBuilder};
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("a")).unwrap();
        fs::create_dir(root.join("a/deep")).unwrap();
        fs::create_dir(root.join("b")).unwrap();

        fs::write(root.join("top.txt"), "top").unwrap();
        fs::write(root.join("a/one.txt"), "one").unwrap();
        fs::write(root.join("a/deep/two.txt"), "two").unwrap();
        fs::write(root.join("b/three.part"), "three").unwrap();

        temp
    }

    fn position(traversal: &Traversal, relative: &str) -> usize {
        let target = traversal.root.join(relative);
        traversal
            .items
            .iter()
            .position(|item| item.path == target)
            .unwrap_or_else(|| panic!("{relative} not visited"))
    }

    #[test]
    fn test_children_precede_parents() {
        let temp = create_test_tree();
        let traversal = walk(temp.path(), &WalkOptions::new()).unwrap();

        assert_eq!(traversal.leaf_count(), 4);
        assert_eq!(traversal.dir_count(), 3);
        assert!(position(&traversal, "a/deep/two.txt") < position(&traversal, "a/deep"));
        assert!(position(&traversal, "a/deep") < position(&traversal, "a"));
        assert!(position(&traversal, "a/one.txt") < position(&traversal, "a"));
        assert!(position(&traversal, "b/three.part") < position(&traversal, "b"));
        assert!(traversal.items.iter().all(|item| item.path != temp.path()));
    }

    #[test]
    fn test_exclude_patterns() {
        let temp = create_test_tree();
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new("*.part").unwrap());
        let options = WalkOptions::new().with_exclude(builder.build().unwrap());

        let traversal = walk(temp.path(), &options).unwrap();
        assert!(
            !traversal
                .items
                .iter()
                .any(|item| item.path.ends_with("three.part"))
        );
        assert!(traversal.items.iter().any(|item| item.path.ends_with("b")));
    }

    #[test]
    fn test_skip_subtree() {
        let temp = create_test_tree();
        let options = WalkOptions::new().skip_path(temp.path().join("a"));

        let traversal = walk(temp.path(), &options).unwrap();
        assert!(
            !traversal
                .items
                .iter()
                .any(|item| item.path.starts_with(temp.path().join("a")))
        );
        assert_eq!(traversal.leaf_count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_leaves() {
        let temp = create_test_tree();
        std::os::unix::fs::symlink(temp.path().join("a"), temp.path().join("link")).unwrap();

        let traversal = walk(temp.path(), &WalkOptions::new()).unwrap();
        let link = &traversal.items[position(&traversal, "link")];
        assert_eq!(link.kind, ItemKind::Symlink);
        assert!(
            !traversal
                .items
                .iter()
                .any(|item| item.path.starts_with(temp.path().join("link/deep")))
        );
    }

    #[test]
    fn test_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = walk(&temp.path().join("missing"), &WalkOptions::new());
        assert!(matches!(result, Err(ItemError::Vanished { .. })));
    }

    #[test]
    fn test_threaded_walk_matches_serial() {
        let temp = create_test_tree();
        let serial = walk(temp.path(), &WalkOptions::new()).unwrap();
        let threaded = walk(temp.path(), &WalkOptions::new().with_threads(4)).unwrap();

        let paths = |t: &Traversal| t.items.iter().map(|i| i.path.clone()).collect::<Vec<_>>();
        assert_eq!(paths(&serial), paths(&threaded));
    }

    #[cfg(unix)]
    #[test]
    fn test_sockets_are_other() {
        let temp = create_test_tree();
        let socket = temp.path().join("a/agent.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();

        let traversal = walk(temp.path(), &WalkOptions::new()).unwrap();
        let socket = &traversal.items[position(&traversal, "a/agent.sock")];
        assert_eq!(socket.kind, ItemKind::Other);
        assert_eq!(socket.size, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_one_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp = create_test_tree();
        let locked = temp.path().join("a/deep");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users read through any mode
        let readable = fs::read_dir(&locked).is_ok();

        let traversal = walk(temp.path(), &WalkOptions::new());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        if readable {
            return;
        }

        let traversal = traversal.unwrap();
        assert_eq!(traversal.failures.len(), 1);
        assert_eq!(traversal.failures[0].path, locked);
        assert_eq!(traversal.failures[0].kind, ItemKind::Directory);
        assert!(matches!(traversal.failures[0].error, ItemError::PermissionDenied { .. }));
    }
}

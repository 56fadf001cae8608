//! Destination planning and collision resolution for relocations.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use expirito_core::ItemError;

/// Maximum number of candidate destinations tried for one item.
pub const MAX_PLAN_ATTEMPTS: u32 = 64;

/// Length of the monitored-root tag appended on collision.
const TAG_LEN: usize = 8;

/// A planned relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationPlan {
    /// Where the item is now.
    pub source: PathBuf,
    /// Where it goes. Free when the plan was made.
    pub destination: PathBuf,
    /// Candidate index that produced the destination (0 = plain mirror).
    pub attempt: u32,
}

impl RelocationPlan {
    /// Whether the destination carries a disambiguating suffix.
    pub fn is_disambiguated(&self) -> bool {
        self.attempt > 0
    }
}

/// Plans destinations inside the holding area for items of one monitored root.
///
/// The destination mirrors the item's path relative to its monitored root.
/// When that path is taken, the first segment under the holding root gets a
/// suffix derived from the monitored root, so destinations from different
/// roots never compete for the same fallback names.
#[derive(Debug, Clone)]
pub struct PathPlanner {
    monitored_root: PathBuf,
    holding_root: PathBuf,
    tag: String,
}

impl PathPlanner {
    /// Create a planner for one monitored root.
    pub fn new(monitored_root: impl Into<PathBuf>, holding_root: impl Into<PathBuf>) -> Self {
        let monitored_root = monitored_root.into();
        Self {
            tag: root_tag(&monitored_root),
            monitored_root,
            holding_root: holding_root.into(),
        }
    }

    /// Disambiguation tag of the monitored root.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Path of `item` relative to the monitored root.
    pub fn relative<'a>(&self, item: &'a Path) -> Result<&'a Path, ItemError> {
        match item.strip_prefix(&self.monitored_root) {
            Ok(relative) if relative.components().next().is_some() => Ok(relative),
            _ => Err(ItemError::OutsideRoot {
                path: item.to_path_buf(),
                root: self.monitored_root.clone(),
            }),
        }
    }

    /// Candidate destination number `attempt` for a relative path.
    ///
    /// Attempt 0 is the plain mirror, attempt 1 appends `~<tag>` to the first
    /// segment, later attempts append `~<tag>-<n>`. When the first segment is
    /// the item itself, the suffix goes before its extension.
    pub fn candidate(&self, relative: &Path, attempt: u32) -> PathBuf {
        if attempt == 0 {
            return self.holding_root.join(relative);
        }

        let suffix = if attempt == 1 {
            format!("~{}", self.tag)
        } else {
            format!("~{}-{attempt}", self.tag)
        };

        let mut components = relative.components();
        let first = match components.next() {
            Some(Component::Normal(first)) => Path::new(first),
            _ => return self.holding_root.join(relative),
        };
        let rest = components.as_path();

        if rest.as_os_str().is_empty() {
            self.holding_root.join(suffixed_leaf(first, &suffix))
        } else {
            let mut segment = first.as_os_str().to_os_string();
            segment.push(&suffix);
            self.holding_root.join(segment).join(rest)
        }
    }

    /// Plan the destination for `item`.
    pub fn plan(&self, item: &Path) -> Result<RelocationPlan, ItemError> {
        self.plan_from(item, 0)
    }

    /// Plan starting at candidate `first_attempt`.
    ///
    /// Used to re-plan after a destination was taken between planning and
    /// commit.
    pub fn plan_from(&self, item: &Path, first_attempt: u32) -> Result<RelocationPlan, ItemError> {
        let relative = self.relative(item)?;
        for attempt in first_attempt..MAX_PLAN_ATTEMPTS {
            let destination = self.candidate(relative, attempt);
            if is_free(&self.holding_root, &destination) {
                return Ok(RelocationPlan {
                    source: item.to_path_buf(),
                    destination,
                    attempt,
                });
            }
        }
        Err(ItemError::CollisionExhaustion {
            path: item.to_path_buf(),
            attempts: MAX_PLAN_ATTEMPTS,
        })
    }

    /// Create the intermediate directories a plan needs.
    pub fn prepare(&self, plan: &RelocationPlan) -> Result<(), ItemError> {
        match plan.destination.parent() {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| ItemError::io(parent, e))
            }
            None => Ok(()),
        }
    }
}

/// Plan a single relocation.
pub fn plan(
    item: &Path,
    monitored_root: &Path,
    holding_root: &Path,
) -> Result<RelocationPlan, ItemError> {
    PathPlanner::new(monitored_root, holding_root).plan(item)
}

/// Short stable tag identifying a monitored root.
pub fn root_tag(root: &Path) -> String {
    let hash = blake3::hash(root.as_os_str().as_encoded_bytes());
    hash.to_hex().as_str()[..TAG_LEN].to_string()
}

/// Insert `suffix` between a file name's stem and extension.
fn suffixed_leaf(name: &Path, suffix: &str) -> OsString {
    let stem = name.file_stem().unwrap_or(name.as_os_str());
    let mut leaf = stem.to_os_string();
    leaf.push(suffix);
    if let Some(ext) = name.extension() {
        leaf.push(".");
        leaf.push(ext);
    }
    leaf
}

/// Whether `candidate` can receive an item.
///
/// Nothing may exist at the candidate itself, and every ancestor below the
/// holding root must be missing or a real directory.
fn is_free(holding_root: &Path, candidate: &Path) -> bool {
    if !is_missing(candidate) {
        return false;
    }
    for ancestor in candidate.ancestors().skip(1) {
        if ancestor == holding_root || !ancestor.starts_with(holding_root) {
            break;
        }
        match fs::symlink_metadata(ancestor) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return false,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => return false,
        }
    }
    true
}

fn is_missing(path: &Path) -> bool {
    matches!(
        fs::symlink_metadata(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound
    )
}

//! Relocation of expired items into the holding area.

use std::fs::{self, File, FileTimes, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use expirito_core::{ItemError, ItemKind};

use crate::planner::{PathPlanner, RelocationPlan};

/// How an item reaches the holding area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Source and holding area share a volume: hard link, then unlink.
    SameVolume,
    /// Copy, verify, then delete the original.
    CrossVolume,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SameVolume => write!(f, "link"),
            Self::CrossVolume => write!(f, "copy"),
        }
    }
}

/// A completed relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Final destination.
    pub destination: PathBuf,
    /// Bytes relocated.
    pub bytes: u64,
    /// Strategy that completed the move.
    pub strategy: Strategy,
    /// Planner candidate used (0 = plain mirror).
    pub attempt: u32,
}

/// Why a commit did not complete.
enum CommitError {
    /// The destination was taken after planning.
    Taken,
    /// The item could not be moved.
    Failed(ItemError),
}

impl From<ItemError> for CommitError {
    fn from(err: ItemError) -> Self {
        Self::Failed(err)
    }
}

/// Relocate a file or symlink into the holding area.
///
/// The destination is planned, its parents are created, and the item is
/// committed without ever replacing an existing entry. A destination taken
/// between planning and commit moves on to the next candidate.
pub fn relocate(
    planner: &PathPlanner,
    source: &Path,
    strategy: Strategy,
) -> Result<Relocation, ItemError> {
    let mut first_attempt = 0;
    loop {
        let plan = planner.plan_from(source, first_attempt)?;
        planner.prepare(&plan)?;

        match commit(&plan, strategy) {
            Ok((bytes, strategy)) => {
                debug!(
                    source = %plan.source.display(),
                    destination = %plan.destination.display(),
                    %strategy,
                    attempt = plan.attempt,
                    disambiguated = plan.is_disambiguated(),
                    "Relocated"
                );
                return Ok(Relocation {
                    destination: plan.destination,
                    bytes,
                    strategy,
                    attempt: plan.attempt,
                });
            }
            Err(CommitError::Taken) => {
                debug!(destination = %plan.destination.display(), "Destination taken, re-planning");
                first_attempt = plan.attempt + 1;
            }
            Err(CommitError::Failed(err)) => return Err(err),
        }
    }
}

/// Move one planned item. Returns the byte count and the strategy used.
///
/// Nothing here ever replaces an existing entry: regular files are hard
/// linked, copies are created with `create_new`, and symlinks are recreated
/// with `symlink`, all of which fail on a taken destination.
fn commit(plan: &RelocationPlan, strategy: Strategy) -> Result<(u64, Strategy), CommitError> {
    let metadata =
        fs::symlink_metadata(&plan.source).map_err(|e| ItemError::io(&plan.source, e))?;
    let kind = ItemKind::from_file_type(metadata.file_type());
    match kind {
        ItemKind::Directory => {
            return Err(CommitError::Failed(ItemError::Io {
                path: plan.source.clone(),
                source: io::Error::other("directories are not relocated as a unit"),
            }));
        }
        ItemKind::Other => {
            return Err(CommitError::Failed(ItemError::NotRegular {
                path: plan.source.clone(),
            }));
        }
        ItemKind::File | ItemKind::Symlink => {}
    }

    if strategy == Strategy::SameVolume && kind == ItemKind::File {
        match link_then_unlink(&plan.source, &plan.destination) {
            Ok(()) => return Ok((metadata.len(), Strategy::SameVolume)),
            Err(LinkError::Unavailable) => {
                debug!(source = %plan.source.display(), "Hard link unavailable, copying instead");
            }
            Err(LinkError::Commit(err)) => return Err(err),
        }
    }

    move_by_copy(&plan.source, &plan.destination, &metadata)?;
    Ok((metadata.len(), Strategy::CrossVolume))
}

enum LinkError {
    /// The filesystem cannot link here (other device, no hard links).
    Unavailable,
    Commit(CommitError),
}

/// Hard link the destination, then unlink the source.
fn link_then_unlink(source: &Path, dest: &Path) -> Result<(), LinkError> {
    if let Err(e) = fs::hard_link(source, dest) {
        return Err(match e.kind() {
            io::ErrorKind::AlreadyExists => LinkError::Commit(CommitError::Taken),
            io::ErrorKind::NotFound => LinkError::Commit(ItemError::io(source, e).into()),
            _ => {
                debug!(error = %e, "Cannot hard link");
                LinkError::Unavailable
            }
        });
    }
    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(dest);
        return Err(LinkError::Commit(ItemError::io(source, e).into()));
    }
    Ok(())
}

/// Copy to the destination, verify it, and only then remove the source.
///
/// A failed or unverifiable copy is removed again and the source is kept.
fn move_by_copy(source: &Path, dest: &Path, metadata: &Metadata) -> Result<(), CommitError> {
    let mut created = false;
    let copied = if metadata.file_type().is_symlink() {
        copy_symlink(source, dest, &mut created)
    } else {
        copy_file(source, dest, metadata, &mut created)
    };

    match copied {
        Ok(()) => {}
        Err(e) if !created && e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(CommitError::Taken);
        }
        Err(e) if !created => return Err(ItemError::io(source, e).into()),
        Err(e) => {
            let _ = fs::remove_file(dest);
            return Err(partial_copy(source, dest, e.to_string()));
        }
    }

    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(dest);
        return Err(ItemError::io(source, e).into());
    }
    Ok(())
}

fn copy_file(source: &Path, dest: &Path, metadata: &Metadata, created: &mut bool) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(dest)?;
    *created = true;

    io::copy(&mut reader, &mut writer)?;
    writer.set_permissions(metadata.permissions())?;

    let mut times = FileTimes::new().set_modified(metadata.modified()?);
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    writer.set_times(times)?;
    writer.sync_all()?;

    let written = fs::metadata(dest)?.len();
    if written != metadata.len() {
        return Err(io::Error::other(format!(
            "size mismatch: copied {written} of {} bytes",
            metadata.len()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path, created: &mut bool) -> io::Result<()> {
    let target = fs::read_link(source)?;
    std::os::unix::fs::symlink(target, dest)?;
    *created = true;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(_source: &Path, _dest: &Path, _created: &mut bool) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks cannot be relocated across volumes on this platform",
    ))
}

fn partial_copy(source: &Path, dest: &Path, reason: String) -> CommitError {
    CommitError::Failed(ItemError::PartialCopy {
        from: source.to_path_buf(),
        to: dest.to_path_buf(),
        reason,
    })
}

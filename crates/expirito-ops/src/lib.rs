//! Filesystem operations for expirito.
//!
//! This crate holds the mutating half of a sweep:
//!
//! - [`PathPlanner`] picks a free destination in the holding area
//! - [`relocate`] moves a file or symlink there without overwriting anything
//! - [`remove_item`] permanently deletes an expired holding-area item
//! - [`EmptyDirPruner`] removes directories left empty afterwards

mod planner;
mod prune;
mod relocate;
mod remove;

pub use planner::{MAX_PLAN_ATTEMPTS, PathPlanner, RelocationPlan, plan, root_tag};
pub use prune::{EmptyDirPruner, PruneReport, prune};
pub use relocate::{Relocation, Strategy, relocate};
pub use remove::remove_item;

//! Tree traversal for expirito.
//!
//! This crate walks a monitored directory or the holding area with jwalk and
//! returns its entries in post-order: every directory appears after all of
//! its descendants, so a sweep can act on children before it evaluates their
//! parent.
//!
//! # Example
//!
//! ```rust,no_run
//! use expirito_scan::{walk, WalkOptions};
//!
//! let traversal = walk("/srv/inbox".as_ref(), &WalkOptions::new()).unwrap();
//! for item in &traversal.items {
//!     println!("{} {}", item.kind, item.path.display());
//! }
//! ```

mod walker;

pub use walker::{Traversal, WalkFailure, WalkOptions, device_id, path_device, walk};

// Re-export core types for convenience
pub use expirito_core::{Item, ItemError, ItemKind};

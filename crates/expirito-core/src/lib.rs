//! Core types and traits for expirito.
//!
//! This crate provides the data structures shared by every stage of a sweep:
//! the sweep configuration, items found by traversal, the audit records a
//! sweep emits, and the pure age classification rule.

pub mod age;
mod config;
mod error;
mod item;
mod record;

pub use age::{AgeClassifier, elapsed_days, is_expired};
pub use config::{
    CONFIG_FILE_NAME, HoldingArea, MonitoredDirectory, SweepConfig, SweepConfigBuilder,
    TimestampBasis,
};
pub use error::{ConfigError, ItemError};
pub use item::{Item, ItemKind};
pub use record::{Action, ActionRecord, AuditSink, MemorySink};

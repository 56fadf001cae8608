//! Audit records emitted by a sweep.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ItemError;
use crate::item::ItemKind;

/// Outcome recorded for one visited item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    /// Relocated into the holding area.
    Moved,
    /// Permanently removed from the holding area.
    Deleted,
    /// Empty directory removed.
    Pruned,
    /// Visited and left untouched.
    Skipped,
    /// An error left the item in place.
    Failed,
}

/// One decision or outcome for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// What happened.
    pub action: Action,
    /// Entry type of the item.
    pub kind: ItemKind,
    /// Path the item was found at.
    pub source: PathBuf,
    /// Where the item went, for relocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    /// Why.
    pub reason: String,
}

impl ActionRecord {
    /// Create a new record.
    pub fn new(
        action: Action,
        kind: ItemKind,
        source: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            kind,
            source: source.into(),
            destination: None,
            reason: reason.into(),
        }
    }

    /// Record a relocation.
    pub fn moved(
        kind: ItemKind,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::new(Action::Moved, kind, source, reason)
        }
    }

    /// Record a permanent removal.
    pub fn deleted(kind: ItemKind, source: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(Action::Deleted, kind, source, reason)
    }

    /// Record a pruned directory.
    pub fn pruned(source: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(Action::Pruned, ItemKind::Directory, source, reason)
    }

    /// Record an item left untouched.
    pub fn skipped(kind: ItemKind, source: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(Action::Skipped, kind, source, reason)
    }

    /// Record a per-item failure.
    pub fn failed(kind: ItemKind, source: impl Into<PathBuf>, error: &ItemError) -> Self {
        Self::new(Action::Failed, kind, source, error.to_string())
    }
}

impl std::fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.destination {
            Some(dest) => write!(
                f,
                "{} {} {} -> {} ({})",
                self.action,
                self.kind,
                self.source.display(),
                dest.display(),
                self.reason
            ),
            None => write!(
                f,
                "{} {} {} ({})",
                self.action,
                self.kind,
                self.source.display(),
                self.reason
            ),
        }
    }
}

/// Destination for audit records.
///
/// The engine delivers records one at a time, in processing order.
pub trait AuditSink: Send {
    /// Accept one record.
    fn record(&mut self, record: &ActionRecord);
}

impl<S: AuditSink + ?Sized> AuditSink for &mut S {
    fn record(&mut self, record: &ActionRecord) {
        (**self).record(record);
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Box<S> {
    fn record(&mut self, record: &ActionRecord) {
        (**self).record(record);
    }
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<ActionRecord>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records collected so far.
    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    /// Consume the sink, returning its records.
    pub fn into_records(self) -> Vec<ActionRecord> {
        self.records
    }

    /// Records with the given action.
    pub fn with_action(&self, action: Action) -> impl Iterator<Item = &ActionRecord> {
        self.records.iter().filter(move |r| r.action == action)
    }

    /// Number of records with the given action.
    pub fn count(&self, action: Action) -> usize {
        self.with_action(action).count()
    }
}

impl AuditSink for MemorySink {
    fn record(&mut self, record: &ActionRecord) {
        self.records.push(record.clone());
    }
}

//! Summary of a completed sweep.

use std::time::Duration;

use itertools::Itertools;
use serde::Serialize;

use expirito_core::{Action, ActionRecord};

use crate::phase::Phase;

/// Time spent in one phase, summed over every root it covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub elapsed: Duration,
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Items relocated into the holding area.
    pub moved: usize,
    /// Items permanently removed from the holding area.
    pub deleted: usize,
    /// Empty directories removed.
    pub pruned: usize,
    /// Items left untouched.
    pub skipped: usize,
    /// Items an error left in place.
    pub failed: usize,
    /// Bytes relocated.
    pub bytes_relocated: u64,
    /// Bytes freed in the holding area.
    pub bytes_deleted: u64,
    /// Timings in the order the phases ran.
    pub phases: Vec<PhaseTiming>,
    /// Wall-clock time of the whole sweep.
    pub duration: Duration,
    /// Whether nothing was mutated.
    pub dry_run: bool,
}

impl SweepReport {
    /// Create an empty report.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// Count one record. `bytes` is the size the action moved or freed.
    pub fn tally(&mut self, record: &ActionRecord, bytes: u64) {
        match record.action {
            Action::Moved => {
                self.moved += 1;
                self.bytes_relocated += bytes;
            }
            Action::Deleted => {
                self.deleted += 1;
                self.bytes_deleted += bytes;
            }
            Action::Pruned => self.pruned += 1,
            Action::Skipped => self.skipped += 1,
            Action::Failed => self.failed += 1,
        }
    }

    /// Total number of records counted.
    pub fn total(&self) -> usize {
        self.moved + self.deleted + self.pruned + self.skipped + self.failed
    }

    /// Whether no item failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Whether the sweep changed (or in a dry run, would change) anything.
    pub fn has_changes(&self) -> bool {
        self.moved + self.deleted + self.pruned > 0
    }

    /// Time spent in `phase`.
    pub fn phase_time(&self, phase: Phase) -> Duration {
        self.phases
            .iter()
            .filter(|timing| timing.phase == phase)
            .map(|timing| timing.elapsed)
            .sum()
    }

    pub(crate) fn record_phase(&mut self, phase: Phase, elapsed: Duration) {
        self.phases.push(PhaseTiming { phase, elapsed });
    }

    /// Get a human-readable summary of the sweep.
    pub fn summary(&self) -> String {
        let parts = [
            (self.moved, "moved"),
            (self.deleted, "deleted"),
            (self.pruned, "pruned"),
            (self.skipped, "skipped"),
            (self.failed, "failed"),
        ];
        let counts = parts
            .iter()
            .filter(|(count, _)| *count > 0)
            .map(|(count, label)| format!("{count} {label}"))
            .join(", ");

        let prefix = if self.dry_run { "Dry run: " } else { "" };
        if counts.is_empty() {
            format!("{prefix}nothing to do")
        } else {
            format!("{prefix}{counts}")
        }
    }
}

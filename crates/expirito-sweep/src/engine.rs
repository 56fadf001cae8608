//! Sweep orchestration.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use globset::GlobSet;
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use expirito_core::{
    ActionRecord, AgeClassifier, AuditSink, ConfigError, Item, ItemError, ItemKind,
    MonitoredDirectory, SweepConfig, TimestampBasis,
};
use expirito_ops::{EmptyDirPruner, PathPlanner, Strategy, relocate, remove_item};
use expirito_scan::{Traversal, WalkOptions, path_device, walk};

use crate::phase::Phase;
use crate::report::SweepReport;

/// Runtime options for a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOptions {
    /// Plan and record every action without touching the filesystem.
    pub dry_run: bool,
    /// Worker threads for the monitored phases (1 = serial).
    pub jobs: usize,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 1,
        }
    }
}

impl SweepOptions {
    /// Set dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the worker count.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }
}

/// A monitored directory ready to sweep.
#[derive(Debug)]
struct Target {
    dir: MonitoredDirectory,
    exclude: GlobSet,
    planner: PathPlanner,
}

/// What happens to an expired file or symlink.
#[derive(Clone, Copy)]
enum Disposal<'a> {
    Relocate(&'a PathPlanner),
    Remove,
}

/// Values fixed for a whole run.
#[derive(Debug, Clone, Copy)]
struct RunContext<'a> {
    basis: TimestampBasis,
    dry_run: bool,
    holding_root: &'a Path,
    holding_device: Option<u64>,
    /// The holding root and every monitored root. Never pruned.
    roots: &'a [PathBuf],
}

/// Runs the two-stage sweep.
///
/// Every monitored directory is scanned, its expired files and symlinks are
/// relocated into the holding area, and directories left empty are pruned.
/// Then the holding area is scanned, its expired items are deleted, and it
/// is pruned in turn. Each phase covers every monitored directory before the
/// next one starts, so the holding phase never overlaps a relocation.
///
/// An error on one item is recorded and never stops the sweep.
#[derive(Debug)]
pub struct SweepEngine {
    config: SweepConfig,
    targets: Vec<Target>,
    options: SweepOptions,
    phase: Phase,
}

impl SweepEngine {
    /// Check `config` against the filesystem and prepare a sweep.
    ///
    /// Nothing is mutated before this returns successfully.
    pub fn new(config: &SweepConfig) -> Result<Self, ConfigError> {
        let config = config.resolve()?;
        let targets = config
            .directories
            .iter()
            .map(|dir| {
                Ok(Target {
                    exclude: dir.exclude_set()?,
                    planner: PathPlanner::new(&dir.path, &config.holding_directory),
                    dir: dir.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            config,
            targets,
            options: SweepOptions::default(),
            phase: Phase::Idle,
        })
    }

    /// Set runtime options.
    pub fn with_options(mut self, options: SweepOptions) -> Self {
        self.options = options;
        self
    }

    /// The resolved configuration.
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Current phase. `Done` once a run has returned.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run one sweep as of the current time.
    pub fn run_now(&mut self, sink: &mut dyn AuditSink) -> SweepReport {
        self.run(SystemTime::now(), sink)
    }

    /// Run one sweep, judging every age against `now`.
    pub fn run(&mut self, now: SystemTime, sink: &mut dyn AuditSink) -> SweepReport {
        let started = Instant::now();
        let holding = self.config.holding();
        let roots: Vec<PathBuf> = std::iter::once(holding.path.clone())
            .chain(self.targets.iter().map(|target| target.dir.path.clone()))
            .collect();
        let ctx = RunContext {
            basis: self.config.timestamp,
            dry_run: self.options.dry_run,
            holding_root: &holding.path,
            holding_device: path_device(&holding.path).ok(),
            roots: &roots,
        };
        let ledger = Ledger::new(sink, ctx.dry_run);
        let pool = worker_pool(self.options.jobs);
        let pool = pool.as_ref();

        info!(
            directories = self.targets.len(),
            holding = %holding.path.display(),
            dry_run = ctx.dry_run,
            "Sweep started"
        );
        self.phase = Phase::Idle;

        // Several roots already share the pool; a single root walks with it
        let walk_threads = if self.targets.len() > 1 { 1 } else { self.options.jobs };

        let clock = self.advance(Phase::ScanningMonitored);
        let scans = each(pool, &self.targets, |target| {
            let mut options = WalkOptions::new()
                .with_exclude(target.exclude.clone())
                .with_threads(walk_threads);
            if ctx.holding_root.starts_with(&target.dir.path) {
                options = options.skip_path(ctx.holding_root);
            }
            scan(&target.dir.path, &options, &ledger)
        });
        ledger.phase_done(Phase::ScanningMonitored, clock.elapsed());

        let clock = self.advance(Phase::RelocatingExpired);
        let work: Vec<_> = self.targets.iter().zip(&scans).collect();
        let removed = each(pool, &work, |(target, traversal)| {
            let Some(traversal) = traversal else {
                return HashSet::new();
            };
            let classifier = AgeClassifier::new(target.dir.age_limit, now);
            dispose(
                traversal,
                &classifier,
                Disposal::Relocate(&target.planner),
                &ctx,
                &ledger,
            )
        });
        ledger.phase_done(Phase::RelocatingExpired, clock.elapsed());

        let clock = self.advance(Phase::PruningMonitored);
        let work: Vec<_> = self.targets.iter().zip(&scans).zip(removed).collect();
        each(pool, &work, |((target, traversal), removed)| {
            prune_root(
                &target.dir.path,
                Some(&target.exclude),
                traversal.as_ref(),
                removed,
                &ctx,
                &ledger,
            );
        });
        ledger.phase_done(Phase::PruningMonitored, clock.elapsed());

        let clock = self.advance(Phase::ScanningHolding);
        let options = WalkOptions::new().with_threads(self.options.jobs);
        let traversal = scan(&holding.path, &options, &ledger);
        ledger.phase_done(Phase::ScanningHolding, clock.elapsed());

        let clock = self.advance(Phase::DeletingExpired);
        let removed = match &traversal {
            Some(traversal) => {
                let classifier = AgeClassifier::new(holding.age_limit, now);
                dispose(traversal, &classifier, Disposal::Remove, &ctx, &ledger)
            }
            None => HashSet::new(),
        };
        ledger.phase_done(Phase::DeletingExpired, clock.elapsed());

        let clock = self.advance(Phase::PruningHolding);
        prune_root(&holding.path, None, traversal.as_ref(), &removed, &ctx, &ledger);
        ledger.phase_done(Phase::PruningHolding, clock.elapsed());

        self.advance(Phase::Done);

        let mut report = ledger.into_report();
        report.duration = started.elapsed();
        info!(
            moved = report.moved,
            deleted = report.deleted,
            pruned = report.pruned,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = report.duration.as_millis() as u64,
            "Sweep complete"
        );
        report
    }

    fn advance(&mut self, phase: Phase) -> Instant {
        debug_assert_eq!(self.phase.next(), phase);
        self.phase = phase;
        info!(%phase, "Phase started");
        Instant::now()
    }
}

/// Records every decision and keeps the running tally.
///
/// The sink sits behind a mutex so parallel workers deliver records one at
/// a time.
struct Ledger<'s> {
    state: Mutex<LedgerState<'s>>,
}

struct LedgerState<'s> {
    sink: &'s mut dyn AuditSink,
    report: SweepReport,
}

impl<'s> Ledger<'s> {
    fn new(sink: &'s mut dyn AuditSink, dry_run: bool) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                sink,
                report: SweepReport::new(dry_run),
            }),
        }
    }

    fn emit(&self, record: ActionRecord, bytes: u64) {
        debug!(
            action = %record.action,
            kind = %record.kind,
            path = %record.source.display(),
            reason = %record.reason,
            "Decision"
        );
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.report.tally(&record, bytes);
        state.sink.record(&record);
    }

    /// Record an item an error kept in place. Vanished items are skips.
    fn item_error(&self, kind: ItemKind, path: &Path, err: &ItemError) {
        if err.is_vanished() {
            self.emit(ActionRecord::skipped(kind, path, "already gone"), 0);
        } else {
            warn!(path = %path.display(), error = %err, "Item failed");
            self.emit(ActionRecord::failed(kind, path, err), 0);
        }
    }

    fn phase_done(&self, phase: Phase, elapsed: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.report.record_phase(phase, elapsed);
    }

    fn into_report(self) -> SweepReport {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .report
    }
}

fn worker_pool(jobs: usize) -> Option<ThreadPool> {
    if jobs <= 1 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(error = %err, "Cannot start worker pool, sweeping serially");
            None
        }
    }
}

/// Apply `f` to every element, on the pool when there is one. Results keep
/// the input order.
fn each<T, R, F>(pool: Option<&ThreadPool>, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    match pool {
        Some(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        None => items.iter().map(f).collect(),
    }
}

fn scan(root: &Path, options: &WalkOptions, ledger: &Ledger<'_>) -> Option<Traversal> {
    match walk(root, options) {
        Ok(traversal) => {
            for failure in &traversal.failures {
                warn!(path = %failure.path.display(), error = %failure.error, "Cannot read entry");
                ledger.emit(
                    ActionRecord::failed(failure.kind, &failure.path, &failure.error),
                    0,
                );
            }
            debug!(
                root = %root.display(),
                files = traversal.leaf_count(),
                directories = traversal.dir_count(),
                "Scanned"
            );
            Some(traversal)
        }
        Err(err) => {
            warn!(root = %root.display(), error = %err, "Cannot scan root");
            ledger.emit(ActionRecord::failed(ItemKind::Directory, root, &err), 0);
            None
        }
    }
}

/// Decide and act on every item of one traversal, in order.
///
/// Entries the scan could not read already have their `failed` record and
/// are left alone. Returns the paths that are gone (or in a dry run, would
/// be gone) afterwards, including empty directories left for the pruner.
fn dispose(
    traversal: &Traversal,
    classifier: &AgeClassifier,
    disposal: Disposal<'_>,
    ctx: &RunContext<'_>,
    ledger: &Ledger<'_>,
) -> HashSet<PathBuf> {
    let unreadable = unreadable_paths(traversal);
    let mut gone = HashSet::new();

    for item in &traversal.items {
        if unreadable.contains(item.path()) {
            continue;
        }
        if item.kind == ItemKind::Other {
            ledger.emit(
                ActionRecord::skipped(item.kind, &item.path, "not a regular file"),
                0,
            );
            continue;
        }

        let timestamp = item.timestamp(ctx.basis);
        let expired = classifier.is_expired(timestamp);
        let age = classifier.describe(timestamp);

        if item.is_dir() {
            if ctx.roots.contains(&item.path) {
                ledger.emit(
                    ActionRecord::skipped(item.kind, &item.path, "root of another sweep area"),
                    0,
                );
                continue;
            }
            let planned = ctx.dry_run.then_some(&gone);
            match remaining_entries(&item.path, planned) {
                Ok(0) => {
                    debug!(path = %item.path.display(), "Empty directory left for pruning");
                    gone.insert(item.path.clone());
                }
                Ok(_) if expired => ledger.emit(
                    ActionRecord::skipped(item.kind, &item.path, format!("holds unexpired entries ({age})")),
                    0,
                ),
                Ok(_) => ledger.emit(
                    ActionRecord::skipped(item.kind, &item.path, format!("not expired ({age})")),
                    0,
                ),
                Err(err) => ledger.item_error(item.kind, &item.path, &err),
            }
            continue;
        }

        if !expired {
            ledger.emit(
                ActionRecord::skipped(item.kind, &item.path, format!("not expired ({age})")),
                0,
            );
            continue;
        }

        let reason = format!("expired ({age})");
        let outcome = match disposal {
            Disposal::Relocate(planner) => move_item(item, planner, ctx, reason),
            Disposal::Remove => delete_item(item, ctx, reason),
        };
        match outcome {
            Ok((record, bytes)) => {
                gone.insert(item.path.clone());
                ledger.emit(record, bytes);
            }
            Err(err) => ledger.item_error(item.kind, &item.path, &err),
        }
    }

    gone
}

fn move_item(
    item: &Item,
    planner: &PathPlanner,
    ctx: &RunContext<'_>,
    reason: String,
) -> Result<(ActionRecord, u64), ItemError> {
    if ctx.dry_run {
        let plan = planner.plan(&item.path)?;
        let record = ActionRecord::moved(item.kind, &item.path, plan.destination, reason);
        return Ok((record, item.size));
    }

    let strategy = if ctx.holding_device == Some(item.device) {
        Strategy::SameVolume
    } else {
        Strategy::CrossVolume
    };
    let relocation = relocate(planner, &item.path, strategy)?;
    let record = ActionRecord::moved(item.kind, &item.path, relocation.destination, reason);
    Ok((record, relocation.bytes))
}

fn delete_item(
    item: &Item,
    ctx: &RunContext<'_>,
    reason: String,
) -> Result<(ActionRecord, u64), ItemError> {
    let bytes = if ctx.dry_run {
        item.size
    } else {
        remove_item(&item.path)?
    };
    Ok((ActionRecord::deleted(item.kind, &item.path, reason), bytes))
}

fn unreadable_paths(traversal: &Traversal) -> HashSet<&Path> {
    traversal.failures.iter().map(|f| f.path.as_path()).collect()
}

/// Count the entries of `dir`, ignoring those in `planned`.
fn remaining_entries(dir: &Path, planned: Option<&HashSet<PathBuf>>) -> Result<usize, ItemError> {
    let mut count = 0;
    for entry in fs::read_dir(dir).map_err(|e| ItemError::io(dir, e))? {
        let entry = entry.map_err(|e| ItemError::io(dir, e))?;
        if planned.is_some_and(|planned| planned.contains(&entry.path())) {
            continue;
        }
        count += 1;
    }
    Ok(count)
}

fn prune_root(
    root: &Path,
    exclude: Option<&GlobSet>,
    traversal: Option<&Traversal>,
    removed: &HashSet<PathBuf>,
    ctx: &RunContext<'_>,
    ledger: &Ledger<'_>,
) {
    let mut pruner = if ctx.dry_run {
        EmptyDirPruner::dry_run(removed.iter().cloned())
    } else {
        EmptyDirPruner::new()
    };
    for protected in ctx.roots {
        pruner = pruner.protect(protected);
    }
    // Already recorded as failed by the scan
    for failure in traversal.map(|t| t.failures.as_slice()).unwrap_or_default() {
        pruner = pruner.protect(&failure.path);
    }
    if let Some(exclude) = exclude {
        pruner = pruner.with_exclude(exclude.clone());
    }

    let report = pruner.prune(root);
    if report.is_empty() {
        debug!(root = %root.display(), "Nothing to prune");
        return;
    }
    for path in report.pruned {
        ledger.emit(ActionRecord::pruned(path, "empty directory"), 0);
    }
    for (path, reason) in report.skipped {
        warn!(path = %path.display(), %reason, "Cannot prune directory");
        ledger.emit(
            ActionRecord::skipped(ItemKind::Directory, path, format!("not pruned: {reason}")),
            0,
        );
    }
}

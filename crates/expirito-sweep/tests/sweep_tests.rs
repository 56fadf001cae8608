//! End-to-end sweeps over temporary trees.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use expirito_core::{Action, ItemKind, MemorySink, MonitoredDirectory, SweepConfig};
use expirito_ops::{MAX_PLAN_ATTEMPTS, PathPlanner};
use expirito_sweep::{SweepEngine, SweepOptions, SweepReport};
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    now: SystemTime,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        Self {
            _temp: temp,
            root,
            now: SystemTime::now(),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn dir(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(&path).unwrap();
        path
    }

    /// Create a file `days` old.
    fn file(&self, relative: &str, days: u32) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, relative).unwrap();
        self.age(&path, days);
        path
    }

    fn age(&self, path: &Path, days: u32) {
        File::open(path)
            .unwrap()
            .set_modified(self.now - DAY * days)
            .unwrap();
    }

    fn sweep(&self, config: &SweepConfig, options: SweepOptions) -> (SweepReport, MemorySink) {
        let mut sink = MemorySink::new();
        let report = SweepEngine::new(config)
            .unwrap()
            .with_options(options)
            .run(self.now, &mut sink);
        (report, sink)
    }
}

fn config(hold: &Path, holding_limit: u32, dirs: &[(&PathBuf, u32)]) -> SweepConfig {
    let mut builder = SweepConfig::builder();
    builder.holding_directory(hold).holding_age_limit(holding_limit);
    for (path, limit) in dirs {
        builder.directory(MonitoredDirectory::new(*path, *limit));
    }
    builder.build().unwrap()
}

#[test]
fn test_relocates_expired_and_prunes_source() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    fx.file("src/a/old.txt", 10);
    let fresh = fx.file("src/b/new.txt", 1);

    let (report, sink) = fx.sweep(&config(&hold, 90, &[(&src, 5)]), SweepOptions::default());

    assert!(hold.join("a/old.txt").is_file());
    assert!(!src.join("a/old.txt").exists());
    assert!(!src.join("a").exists());
    assert!(fresh.is_file());
    assert!(src.is_dir());

    assert_eq!(report.moved, 1);
    assert_eq!(report.pruned, 1);
    assert_eq!(report.deleted, 0);
    assert!(report.is_success());

    let moved: Vec<_> = sink.with_action(Action::Moved).collect();
    assert_eq!(moved[0].destination.as_deref(), Some(hold.join("a/old.txt").as_path()));
}

#[test]
fn test_deletes_expired_holding_items() {
    let fx = Fixture::new();
    let hold = fx.dir("hold");
    fx.file("hold/x/file.bin", 91);
    let kept = fx.file("hold/y/recent.bin", 10);

    let (report, _) = fx.sweep(&config(&hold, 90, &[]), SweepOptions::default());

    assert!(!hold.join("x/file.bin").exists());
    assert!(!hold.join("x").exists());
    assert!(kept.is_file());
    assert!(hold.is_dir());
    assert_eq!(report.deleted, 1);
    assert_eq!(report.pruned, 1);
    assert_eq!(report.bytes_deleted, "hold/x/file.bin".len() as u64);
}

#[test]
fn test_same_relative_path_from_two_roots() {
    let fx = Fixture::new();
    let src1 = fx.dir("src1");
    let src2 = fx.dir("src2");
    let hold = fx.dir("hold");
    fx.file("src1/docs/report.pdf", 10);
    fx.file("src2/docs/report.pdf", 10);

    let (report, sink) = fx.sweep(
        &config(&hold, 90, &[(&src1, 5), (&src2, 5)]),
        SweepOptions::default(),
    );

    assert_eq!(report.moved, 2);
    let destinations: Vec<_> = sink
        .with_action(Action::Moved)
        .filter_map(|r| r.destination.clone())
        .collect();
    assert_eq!(destinations.len(), 2);
    assert_ne!(destinations[0], destinations[1]);
    assert_eq!(fs::read_to_string(&destinations[0]).unwrap(), "src1/docs/report.pdf");
    assert_eq!(fs::read_to_string(&destinations[1]).unwrap(), "src2/docs/report.pdf");
}

#[test]
fn test_second_run_is_a_no_op() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    fx.file("src/a/old.txt", 10);
    fx.file("src/b/c/new.txt", 1);
    fx.file("hold/x/ancient.bin", 200);
    let config = config(&hold, 90, &[(&src, 5)]);

    let (first, _) = fx.sweep(&config, SweepOptions::default());
    assert!(first.has_changes());

    let (second, sink) = fx.sweep(&config, SweepOptions::default());
    assert!(!second.has_changes(), "{}", second.summary());
    assert_eq!(sink.count(Action::Failed), 0);
}

#[test]
fn test_existing_holding_entry_is_never_overwritten() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    fx.file("hold/a/old.txt", 1);
    fs::write(hold.join("a/old.txt"), "from an earlier run").unwrap();
    fx.file("src/a/old.txt", 10);

    let (report, sink) = fx.sweep(&config(&hold, 90, &[(&src, 5)]), SweepOptions::default());

    assert_eq!(report.moved, 1);
    assert_eq!(
        fs::read_to_string(hold.join("a/old.txt")).unwrap(),
        "from an earlier run"
    );
    let record = sink.with_action(Action::Moved).next().unwrap();
    let destination = record.destination.clone().unwrap();
    assert_ne!(destination, hold.join("a/old.txt"));
    assert_eq!(fs::read_to_string(destination).unwrap(), "src/a/old.txt");
}

#[test]
fn test_dry_run_changes_nothing() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    fx.file("src/a/b/old.txt", 10);
    fx.file("hold/x/file.bin", 91);

    let (report, sink) = fx.sweep(
        &config(&hold, 90, &[(&src, 5)]),
        SweepOptions::default().with_dry_run(true),
    );

    assert!(report.dry_run);
    assert_eq!(report.moved, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.pruned, 3);
    assert!(src.join("a/b/old.txt").is_file());
    assert!(hold.join("x/file.bin").is_file());
    assert!(!hold.join("a").exists());

    let pruned: Vec<_> = sink.with_action(Action::Pruned).map(|r| r.source.clone()).collect();
    assert!(pruned.contains(&src.join("a/b")));
    assert!(pruned.contains(&src.join("a")));
    assert!(pruned.contains(&hold.join("x")));
}

#[test]
fn test_excluded_entries_are_not_visited() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    let partial = fx.file("src/dl/movie.part", 30);
    fx.file("src/dl/movie.txt", 30);

    let mut config = config(&hold, 90, &[]);
    config
        .directories
        .push(MonitoredDirectory::new(&src, 5).with_exclude(["*.part"]));

    let (report, sink) = fx.sweep(&config, SweepOptions::default());

    assert!(partial.is_file());
    assert_eq!(report.moved, 1);
    assert!(sink.records().iter().all(|r| r.source != partial));
}

#[test]
fn test_nested_holding_area_is_left_alone() {
    let fx = Fixture::new();
    let src = fx.dir("home");
    let hold = fx.dir("home/.holding");
    fx.file("home/.holding/kept/old.txt", 10);
    fx.file("home/stale.txt", 10);

    let (report, sink) = fx.sweep(&config(&hold, 90, &[(&src, 5)]), SweepOptions::default());

    assert_eq!(report.moved, 1);
    assert!(hold.join("stale.txt").is_file());
    assert!(hold.join("kept/old.txt").is_file());
    assert!(hold.is_dir());
    assert!(
        sink.with_action(Action::Moved)
            .all(|r| !r.source.starts_with(&hold))
    );
}

#[test]
fn test_zero_age_limit_expires_everything() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    fx.file("src/brand-new.txt", 0);

    let (report, _) = fx.sweep(&config(&hold, 90, &[(&src, 0)]), SweepOptions::default());

    assert_eq!(report.moved, 1);
    assert!(hold.join("brand-new.txt").is_file());
}

#[test]
fn test_unexpired_items_are_skipped_with_reason() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    let fresh = fx.file("src/fresh.txt", 2);

    let (report, sink) = fx.sweep(&config(&hold, 90, &[(&src, 5)]), SweepOptions::default());

    assert_eq!(report.skipped, 1);
    let record = &sink.records()[0];
    assert_eq!(record.action, Action::Skipped);
    assert_eq!(record.kind, ItemKind::File);
    assert_eq!(record.source, fresh);
    assert!(record.reason.starts_with("not expired"));
}

#[test]
fn test_overlapping_roots_report_already_gone() {
    let fx = Fixture::new();
    let outer = fx.dir("data");
    let inner = fx.dir("data/inner");
    let hold = fx.dir("hold");
    fx.file("data/inner/old.txt", 10);

    let (report, sink) = fx.sweep(
        &config(&hold, 90, &[(&outer, 5), (&inner, 5)]),
        SweepOptions::default(),
    );

    assert_eq!(report.moved, 1);
    assert!(report.is_success());
    assert!(
        sink.with_action(Action::Skipped)
            .any(|r| r.reason == "already gone")
    );
}

#[test]
fn test_parallel_jobs_match_serial_outcome() {
    let fx = Fixture::new();
    let hold = fx.dir("hold");
    let roots: Vec<PathBuf> = (0..4).map(|i| fx.dir(&format!("src{i}"))).collect();
    for i in 0..4 {
        fx.file(&format!("src{i}/shared/name.txt"), 10);
        fx.file(&format!("src{i}/keep.txt"), 1);
    }
    let dirs: Vec<(&PathBuf, u32)> = roots.iter().map(|r| (r, 5)).collect();

    let (report, sink) = fx.sweep(&config(&hold, 90, &dirs), SweepOptions::default().with_jobs(4));

    // keep.txt in every root, plus each relocated file and its directory in
    // the holding area
    assert_eq!(report.moved, 4);
    assert_eq!(report.skipped, 12);
    assert_eq!(report.pruned, 4);
    assert!(report.is_success());
    let mut destinations: Vec<_> = sink
        .with_action(Action::Moved)
        .filter_map(|r| r.destination.clone())
        .collect();
    destinations.sort();
    destinations.dedup();
    assert_eq!(destinations.len(), 4);
}

#[test]
fn test_missing_root_is_a_config_error() {
    let fx = Fixture::new();
    let hold = fx.dir("hold");
    let config = config(&hold, 90, &[(&fx.path("absent"), 5)]);

    assert!(SweepEngine::new(&config).is_err());
}

#[test]
fn test_exhausted_destinations_fail_one_item_only() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    let stuck = fx.file("src/docs/report.pdf", 10);
    fx.file("src/notes.txt", 10);

    let planner = PathPlanner::new(&src, &hold);
    for attempt in 0..MAX_PLAN_ATTEMPTS {
        let taken = planner.candidate(Path::new("docs/report.pdf"), attempt);
        fs::create_dir_all(taken.parent().unwrap()).unwrap();
        fs::write(&taken, "taken").unwrap();
    }

    let (report, sink) = fx.sweep(&config(&hold, 90, &[(&src, 5)]), SweepOptions::default());

    assert_eq!(report.failed, 1);
    assert!(!report.is_success());
    let failed: Vec<_> = sink.with_action(Action::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, stuck);
    assert!(failed[0].reason.contains("No free destination"));
    assert!(stuck.is_file());

    assert_eq!(report.moved, 1);
    assert!(hold.join("notes.txt").is_file());
    assert!(!src.join("notes.txt").exists());
}

#[cfg(unix)]
#[test]
fn test_special_files_are_skipped() {
    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    let socket = src.join("agent.sock");
    let _listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();
    fx.file("src/old.txt", 10);

    let (report, sink) = fx.sweep(&config(&hold, 90, &[(&src, 0)]), SweepOptions::default());

    assert!(report.is_success());
    assert_eq!(report.moved, 1);
    let record = sink.records().iter().find(|r| r.source == socket).unwrap();
    assert_eq!(record.action, Action::Skipped);
    assert_eq!(record.kind, ItemKind::Other);
    assert_eq!(record.reason, "not a regular file");
    assert!(fs::symlink_metadata(&socket).is_ok());
    assert!(fs::symlink_metadata(hold.join("agent.sock")).is_err());
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_is_recorded_once() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let src = fx.dir("src");
    let hold = fx.dir("hold");
    fx.file("src/locked/old.txt", 10);
    let locked = src.join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    // Privileged users read through any mode
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let (report, sink) = fx.sweep(&config(&hold, 90, &[(&src, 5)]), SweepOptions::default());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    let records: Vec<_> = sink.records().iter().filter(|r| r.source == locked).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, Action::Failed);
    assert_eq!(records[0].kind, ItemKind::Directory);
    assert_eq!(report.failed, 1);
    assert!(locked.join("old.txt").is_file());
}


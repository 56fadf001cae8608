//! expirito - Two-stage, age-based file retirement.
//!
//! Usage:
//!   expirito                   Sweep with the default configuration
//!   expirito --config FILE     Sweep with a specific configuration
//!   expirito --dry-run         Show what a sweep would do
//!   expirito --help            Show help

mod audit;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use expirito_core::SweepConfig;
use expirito_sweep::{SweepEngine, SweepOptions, SweepReport};

use audit::{FanoutSink, JsonLinesSink, TracingSink};

/// Exit status when at least one item failed.
const EXIT_ITEM_FAILURES: u8 = 2;

#[derive(Parser)]
#[command(
    name = "expirito",
    version,
    about = "Retire old files: move them to a holding area, delete them later",
    long_about = "expirito sweeps the configured directories once per run. Items older than \
                  a directory's age limit are moved into the holding area, mirroring their \
                  relative path. Items that outlive the holding area's own limit are deleted. \
                  Directories left empty are removed.\n\n\
                  Run it from a timer (cron, systemd) to keep directories tidy."
)]
struct Cli {
    /// Configuration file (defaults to <config dir>/expirito/config.toml)
    #[arg(short, long, visible_alias = "config-file")]
    config: Option<PathBuf>,

    /// Record what would happen without changing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Worker threads for the monitored directories
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Log every decision
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => SweepConfig::default_path()
            .ok_or_else(|| eyre!("Cannot locate the configuration directory; pass --config"))?,
    };
    let config = SweepConfig::load(&config_path)
        .wrap_err_with(|| format!("Cannot load configuration {}", config_path.display()))?;

    let options = SweepOptions::default()
        .with_dry_run(cli.dry_run)
        .with_jobs(cli.jobs.max(1));
    let mut engine = SweepEngine::new(&config)
        .wrap_err("Configuration rejected")?
        .with_options(options);

    let mut sink = FanoutSink::new();
    sink.push(TracingSink);
    if let Some(log_file) = engine.config().log_file.clone() {
        let log = JsonLinesSink::append(&log_file, cli.dry_run)
            .wrap_err_with(|| format!("Cannot open audit log {}", log_file.display()))?;
        sink.push(log);
    }

    let report = engine.run_now(&mut sink);
    drop(sink);

    print_report(&report, cli.json)?;

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_ITEM_FAILURES))
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("EXPIRITO_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_report(report: &SweepReport, json: bool) -> Result<()> {
    if json {
        let output = serde_json::to_string_pretty(report).wrap_err("Failed to serialize report")?;
        println!("{output}");
        return Ok(());
    }

    println!();
    println!("{}", "─".repeat(60));
    println!(" {}", report.summary());
    println!(
        " {} relocated, {} freed",
        format_size(report.bytes_relocated),
        format_size(report.bytes_deleted)
    );
    println!(" Swept in {:.2}s", report.duration.as_secs_f64());
    println!("{}", "─".repeat(60));

    if !report.is_success() {
        println!();
        println!("{} item(s) failed; see the log for details", report.failed);
    }

    Ok(())
}

/// Format bytes as human-readable size.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

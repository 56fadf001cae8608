//! Audit sinks used by the command-line tool.

use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use expirito_core::{ActionRecord, AuditSink};

/// Emits every record as a structured `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&mut self, record: &ActionRecord) {
        match &record.destination {
            Some(destination) => info!(
                target: "expirito::audit",
                action = %record.action,
                kind = %record.kind,
                source = %record.source.display(),
                destination = %destination.display(),
                reason = %record.reason,
                "{}",
                record.action
            ),
            None => info!(
                target: "expirito::audit",
                action = %record.action,
                kind = %record.kind,
                source = %record.source.display(),
                reason = %record.reason,
                "{}",
                record.action
            ),
        }
    }
}

/// One line of the JSON audit log.
#[derive(Serialize)]
struct AuditLine<'a> {
    timestamp: DateTime<Utc>,
    dry_run: bool,
    #[serde(flatten)]
    record: &'a ActionRecord,
}

/// Appends one JSON object per record.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    dry_run: bool,
    failures: usize,
}

impl JsonLinesSink<LineWriter<File>> {
    /// Open `path` for appending, creating it and its parent if needed.
    pub fn append(path: &Path, dry_run: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(LineWriter::new(file), dry_run))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Write records to `writer`.
    pub fn new(writer: W, dry_run: bool) -> Self {
        Self {
            writer,
            dry_run,
            failures: 0,
        }
    }

    /// Number of records that could not be written.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Consume the sink, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, record: &ActionRecord) -> io::Result<()> {
        let line = AuditLine {
            timestamp: Utc::now(),
            dry_run: self.dry_run,
            record,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")
    }
}

impl<W: Write + Send> AuditSink for JsonLinesSink<W> {
    fn record(&mut self, record: &ActionRecord) {
        if let Err(err) = self.write_line(record) {
            // Report the first failure only; the rest would repeat it
            if self.failures == 0 {
                warn!(error = %err, "Cannot write audit log");
            }
            self.failures += 1;
        }
    }
}

/// Delivers every record to several sinks, in order.
#[derive(Default)]
pub struct FanoutSink<'a> {
    sinks: Vec<Box<dyn AuditSink + 'a>>,
}

impl<'a> FanoutSink<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn push(&mut self, sink: impl AuditSink + 'a) {
        self.sinks.push(Box::new(sink));
    }
}

impl AuditSink for FanoutSink<'_> {
    fn record(&mut self, record: &ActionRecord) {
        for sink in &mut self.sinks {
            sink.record(record);
        }
    }
}

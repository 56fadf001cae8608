//! Two-stage, age-based sweep engine.
//!
//! A sweep relocates expired items from monitored directories into a
//! holding area, permanently deletes items that have outlived the holding
//! area's own limit, and prunes directories left empty along the way.
//!
//! # Example
//!
//! ```rust,no_run
//! use expirito_core::{MemorySink, MonitoredDirectory, SweepConfig};
//! use expirito_sweep::{SweepEngine, SweepOptions};
//!
//! let config = SweepConfig::builder()
//!     .holding_directory("/var/lib/expirito/holding")
//!     .holding_age_limit(90u32)
//!     .directory(MonitoredDirectory::new("/home/me/Downloads", 30))
//!     .build()
//!     .unwrap();
//!
//! let mut sink = MemorySink::new();
//! let mut engine = SweepEngine::new(&config)
//!     .unwrap()
//!     .with_options(SweepOptions::default().with_dry_run(true));
//! let report = engine.run_now(&mut sink);
//! println!("{}", report.summary());
//! ```

mod engine;
mod phase;
mod report;

pub use engine::{SweepEngine, SweepOptions};
pub use phase::Phase;
pub use report::{PhaseTiming, SweepReport};

// Re-export core types for convenience
pub use expirito_core::{Action, ActionRecord, AuditSink, MemorySink, SweepConfig};

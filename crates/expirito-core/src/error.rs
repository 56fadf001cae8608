//! Error types for configuration and per-item sweep operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent a sweep from starting.
///
/// These are raised before any filesystem mutation happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file does not exist.
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read.
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A configured path is relative.
    #[error("Path must be absolute: {path}")]
    RelativePath { path: PathBuf },

    /// A configured root cannot be reached.
    #[error("Root is not reachable: {path}: {source}")]
    Unreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configured root exists but is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A monitored directory is the holding area or lies inside it.
    #[error("Monitored directory {monitored} lies inside the holding area {holding}")]
    InsideHolding { monitored: PathBuf, holding: PathBuf },

    /// An exclude pattern does not compile.
    #[error("Invalid exclude pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// Any other structural problem.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors isolated to a single item.
///
/// A sweep records these as `failed` and carries on with the next item.
#[derive(Debug, Error)]
pub enum ItemError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path disappeared between traversal and action.
    #[error("Path vanished: {path}")]
    Vanished { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The planner ran out of candidate destinations.
    #[error("No free destination for {path} after {attempts} attempts")]
    CollisionExhaustion { path: PathBuf, attempts: u32 },

    /// A cross-volume copy failed or could not be verified.
    #[error("Copy of {from} to {to} failed: {reason}")]
    PartialCopy {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    /// A FIFO, socket or device node. Reading one may block forever.
    #[error("Not a regular file: {path}")]
    NotRegular { path: PathBuf },

    /// The item is not located under the root it was found in.
    #[error("{path} is not under monitored root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl ItemError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::Vanished { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether the item was already gone when it was acted upon.
    pub fn is_vanished(&self) -> bool {
        matches!(self, Self::Vanished { .. })
    }
}

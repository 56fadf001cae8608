//! Sweep configuration types.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// File name of the configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Which timestamp decides an item's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampBasis {
    /// Last modification time.
    #[default]
    Modified,
    /// Last access time.
    Accessed,
}

/// A source tree subject to expiration sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredDirectory {
    /// Absolute path of the tree root.
    pub path: PathBuf,
    /// Items at least this many days old are relocated.
    pub age_limit: u32,
    /// Glob patterns for entries that are never visited.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl MonitoredDirectory {
    /// Create a monitored directory without exclusions.
    pub fn new(path: impl Into<PathBuf>, age_limit: u32) -> Self {
        Self {
            path: path.into(),
            age_limit,
            exclude: Vec::new(),
        }
    }

    /// Set exclude patterns.
    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Compile the exclude patterns.
    pub fn exclude_set(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|source| ConfigError::Pattern {
            pattern: self.exclude.join(", "),
            source,
        })
    }
}

/// The staging location expired items are moved to before deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingArea {
    /// Absolute path of the holding root.
    pub path: PathBuf,
    /// Items at least this many days old are deleted.
    pub age_limit: u32,
}

/// Configuration for one sweep.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct SweepConfig {
    /// Monitored directories, processed in order.
    #[builder(default)]
    #[serde(default)]
    pub directories: Vec<MonitoredDirectory>,

    /// Holding area root.
    pub holding_directory: PathBuf,

    /// Age limit for items in the holding area, in days.
    pub holding_age_limit: u32,

    /// Append-only JSON-lines audit log.
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Timestamp used to compute item age.
    #[builder(default)]
    #[serde(default)]
    pub timestamp: TimestampBasis,
}

impl SweepConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let Some(holding) = &self.holding_directory else {
            return Err("Holding directory is required".to_string());
        };
        let directories = self.directories.as_deref().unwrap_or_default();
        check_layout(holding, directories).map_err(|e| e.to_string())
    }

    /// Append a monitored directory.
    pub fn directory(&mut self, directory: MonitoredDirectory) -> &mut Self {
        self.directories
            .get_or_insert_with(Vec::new)
            .push(directory);
        self
    }
}

impl From<SweepConfigBuilderError> for ConfigError {
    fn from(err: SweepConfigBuilderError) -> Self {
        ConfigError::Invalid {
            message: err.to_string(),
        }
    }
}

impl SweepConfig {
    /// Create a new sweep config builder.
    pub fn builder() -> SweepConfigBuilder {
        SweepConfigBuilder::default()
    }

    /// Default configuration file location (`<config dir>/expirito/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("expirito").join(CONFIG_FILE_NAME))
    }

    /// Load and structurally validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_toml(&contents).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and structurally validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        check_layout(&config.holding_directory, &config.directories)?;
        Ok(config)
    }

    /// The holding area.
    pub fn holding(&self) -> HoldingArea {
        HoldingArea {
            path: self.holding_directory.clone(),
            age_limit: self.holding_age_limit,
        }
    }

    /// Check every root on disk and return a copy with canonical paths.
    ///
    /// This is the preflight that runs before any mutation. Overlapping
    /// monitored directories are accepted with a warning.
    pub fn resolve(&self) -> Result<Self, ConfigError> {
        check_layout(&self.holding_directory, &self.directories)?;

        let holding = canonical_dir(&self.holding_directory)?;
        let mut directories = Vec::with_capacity(self.directories.len());
        for dir in &self.directories {
            let path = canonical_dir(&dir.path)?;
            if path.starts_with(&holding) {
                return Err(ConfigError::InsideHolding {
                    monitored: path,
                    holding,
                });
            }
            directories.push(MonitoredDirectory {
                path,
                ..dir.clone()
            });
        }

        for (i, a) in directories.iter().enumerate() {
            for b in &directories[i + 1..] {
                if a.path.starts_with(&b.path) || b.path.starts_with(&a.path) {
                    warn!(
                        first = %a.path.display(),
                        second = %b.path.display(),
                        "Monitored directories overlap; shared items are processed by the first root that reaches them"
                    );
                }
            }
        }

        Ok(Self {
            directories,
            holding_directory: holding,
            ..self.clone()
        })
    }
}

/// Rules that need no filesystem access.
fn check_layout(holding: &Path, directories: &[MonitoredDirectory]) -> Result<(), ConfigError> {
    if !holding.is_absolute() {
        return Err(ConfigError::RelativePath {
            path: holding.to_path_buf(),
        });
    }
    for dir in directories {
        if !dir.path.is_absolute() {
            return Err(ConfigError::RelativePath {
                path: dir.path.clone(),
            });
        }
        if dir.path.starts_with(holding) {
            return Err(ConfigError::InsideHolding {
                monitored: dir.path.clone(),
                holding: holding.to_path_buf(),
            });
        }
        dir.exclude_set()?;
    }
    Ok(())
}

fn canonical_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let canonical = path
        .canonicalize()
        .map_err(|source| ConfigError::Unreachable {
            path: path.to_path_buf(),
            source,
        })?;
    if !canonical.is_dir() {
        return Err(ConfigError::NotADirectory { path: canonical });
    }
    Ok(canonical)
}

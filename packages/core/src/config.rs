//! Engine configuration
//!
//! Defaults suit a local single-user install. `from_env` and `load` layer
//! overrides on top of them; a missing config file is not an error.

use crate::behaviors::{HierarchyRules, DEFAULT_PARENTABLE};
use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_EVENT_CHANNEL_CAPACITY};
use crate::models::{NodeType, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DB_PATH_ENV: &str = "CAREERLINE_DB_PATH";
pub const BUSY_TIMEOUT_ENV: &str = "CAREERLINE_BUSY_TIMEOUT_MS";
pub const PARENTABLE_TYPES_ENV: &str = "CAREERLINE_PARENTABLE_TYPES";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HierarchyConfig {
    /// SQLite database file; parent directories are created on open
    pub database_path: PathBuf,

    /// Per-connection `PRAGMA busy_timeout`
    pub busy_timeout_ms: u64,

    /// Node types allowed to have children; every other type is a leaf
    pub parentable_types: Vec<NodeType>,

    pub event_channel_capacity: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/careerline.db"),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            parentable_types: DEFAULT_PARENTABLE
                .iter()
                .filter(|(_, parentable)| *parentable)
                .map(|(node_type, _)| *node_type)
                .collect(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl HierarchyConfig {
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Defaults overridden by `CAREERLINE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_overrides(|name| std::env::var(name).ok())
    }

    /// Read a JSON config file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = lookup(DB_PATH_ENV) {
            self.database_path = PathBuf::from(path);
        }

        if let Some(timeout) = lookup(BUSY_TIMEOUT_ENV) {
            self.busy_timeout_ms =
                timeout
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        name: BUSY_TIMEOUT_ENV.to_string(),
                        reason: e.to_string(),
                    })?;
        }

        if let Some(types) = lookup(PARENTABLE_TYPES_ENV) {
            self.parentable_types = types
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(|name| name.parse::<NodeType>())
                .collect::<Result<Vec<_>, ValidationError>>()
                .map_err(|e| ConfigError::InvalidValue {
                    name: PARENTABLE_TYPES_ENV.to_string(),
                    reason: e.to_string(),
                })?;
        }

        Ok(self)
    }

    pub fn hierarchy_rules(&self) -> HierarchyRules {
        HierarchyRules::new(self.parentable_types.iter().copied())
    }
}

//! Engine configuration.
//!
//! # Responsibility
//! - Hold tunables for import validation and undo retention.
//! - Load them from TOML with per-key defaults.
//!
//! # Invariants
//! - `backup_retention_days` is at least 1.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Days an import backup stays restorable.
    pub backup_retention_days: u32,
    /// Allowed clock skew before an incoming `updated_at` counts as future.
    pub future_timestamp_tolerance_secs: u32,
    /// Package categories that are counted and reported but never imported.
    pub excluded_categories: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backup_retention_days: 30,
            future_timestamp_tolerance_secs: 300,
            excluded_categories: vec!["recordings".to_string(), "crisis_resources".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backup_retention_days == 0 {
            return Err(ConfigError::Invalid(
                "backup_retention_days must be at least 1".to_string(),
            ));
        }
        if self
            .excluded_categories
            .iter()
            .any(|category| category.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "excluded_categories cannot contain blank names".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retention_ms(&self) -> i64 {
        i64::from(self.backup_retention_days) * MS_PER_DAY
    }

    pub fn future_tolerance_ms(&self) -> i64 {
        i64::from(self.future_timestamp_tolerance_secs) * 1000
    }

    pub fn is_excluded(&self, category: &str) -> bool {
        self.excluded_categories
            .iter()
            .any(|excluded| excluded == category)
    }
}

//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Document store backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store; contents are lost when the process exits.
    Memory,
    /// One JSON file per document on the local filesystem.
    Filesystem {
        /// Root directory of the store.
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/store"),
        }
    }
}

impl StoreConfig {
    /// Validate the store configuration.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem store requires a non-empty 'path'".to_string())
            }
            StoreConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Bulk operation batching configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of items sent to the store concurrently per window.
    /// Keep this small; document stores throttle concurrent writes.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    crate::DEFAULT_BATCH_SIZE
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl BatchConfig {
    /// Validate the batch configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 || self.batch_size > crate::MAX_BATCH_SIZE {
            return Err(format!(
                "batch_size must be between 1 and {} (got {})",
                crate::MAX_BATCH_SIZE,
                self.batch_size
            ));
        }
        Ok(())
    }
}

/// Trash retention configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrashConfig {
    /// Days a trash entry is kept before it becomes eligible for purge.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Run the expiry sweep periodically in the background (disabled by default).
    #[serde(default)]
    pub auto_sweep_enabled: bool,
    /// Interval in seconds between background sweeps (default: 1 hour).
    #[serde(default = "default_auto_sweep_interval_secs")]
    pub auto_sweep_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    crate::DEFAULT_RETENTION_DAYS
}

fn default_auto_sweep_interval_secs() -> u64 {
    3600
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            auto_sweep_enabled: false,
            auto_sweep_interval_secs: default_auto_sweep_interval_secs(),
        }
    }
}

impl TrashConfig {
    /// Retention window as a Duration.
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }

    /// Background sweep interval as a std Duration.
    pub fn auto_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auto_sweep_interval_secs)
    }

    /// Validate the trash configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.retention_days == 0 {
            return Err("retention_days must be at least 1".to_string());
        }
        if self.auto_sweep_enabled && self.auto_sweep_interval_secs == 0 {
            return Err("auto_sweep_interval_secs must be positive when auto sweep is enabled".to_string());
        }
        Ok(())
    }
}

/// Identity recorded on trash and restore stamps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(default = "default_operator_name")]
    pub name: String,
}

fn default_operator_name() -> String {
    "analyst".to_string()
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            name: default_operator_name(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Document store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Bulk operation batching.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Trash retention and sweeping.
    #[serde(default)]
    pub trash: TrashConfig,
    /// Operator identity.
    #[serde(default)]
    pub operator: OperatorConfig,
}

impl AppConfig {
    /// Create a test configuration backed by the in-memory store.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            store: StoreConfig::Memory,
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()?;
        self.batch.validate()?;
        self.trash.validate()?;
        if self.operator.name.trim().is_empty() {
            return Err("operator name must not be empty".to_string());
        }
        Ok(())
    }
}

//! Graph service configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! values in [`crate::constants::defaults`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::cache::WritePolicy;
use crate::constants::defaults;

/// Settings for [`crate::service::GraphGenerationService`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphServiceConfig {
    /// How long cached graphs are retained, in seconds
    pub cache_ttl_secs: u64,
    /// Number of background cache writer tasks
    pub write_workers: usize,
    /// Pending cache writes accepted before new ones are dropped
    pub write_queue_capacity: usize,
    /// Re-read vertex status and timestamps for nodes already in a cached list
    pub refresh_stale_vertices: bool,
    /// Refuse cache writes older than the stored value
    pub guard_stale_writes: bool,
}

impl Default for GraphServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: defaults::CACHE_TTL_SECS,
            write_workers: defaults::WRITE_WORKERS,
            write_queue_capacity: defaults::WRITE_QUEUE_CAPACITY,
            refresh_stale_vertices: true,
            guard_stale_writes: true,
        }
    }
}

impl GraphServiceConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn write_policy(&self) -> WritePolicy {
        if self.guard_stale_writes {
            WritePolicy::IfNotOlder
        } else {
            WritePolicy::Always
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_workers == 0 {
            return Err(ConfigError::Invalid(
                "writeWorkers must be at least 1".to_string(),
            ));
        }
        if self.write_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "writeQueueCapacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from disk, using defaults if the file is missing
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No graph service config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, contents).await?;

        log::info!("Graph service configuration saved to {:?}", path);
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

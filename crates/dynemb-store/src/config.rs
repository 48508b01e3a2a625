//! Store and executor configuration.
//!
//! Configuration is always passed explicitly to constructors; there is no
//! process-wide default worker count or shard count.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Configuration for a [`ShardedConcurrentMap`](crate::ShardedConcurrentMap).
///
/// # Example
///
/// ```
/// use dynemb_store::StoreConfig;
///
/// let config = StoreConfig::builder()
///     .num_shards(32)
///     .dim(8)
///     .num_workers(4)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of shards. Must be a power of two.
    pub num_shards: usize,

    /// Fixed embedding dimension, or `None` for variable-length vectors.
    pub dim: Option<usize>,

    /// Executor used for parallel scans.
    pub executor: ExecutorConfig,

    /// Number of tasks a scan is split into (default: one per worker).
    pub scan_tasks: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            num_shards: 16,
            dim: None,
            executor: ExecutorConfig::default(),
            scan_tasks: None,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration builder.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Parse a configuration from a JSON document. Missing fields take their
    /// default values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidConfigFile(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::ConfigFileNotFound(path.to_path_buf()))?;
        Self::from_json_str(&raw)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_shards == 0 || !self.num_shards.is_power_of_two() {
            return Err(ConfigError::InvalidShardCount(self.num_shards));
        }
        if self.dim == Some(0) {
            return Err(ConfigError::InvalidDimension);
        }
        if self.scan_tasks == Some(0) {
            return Err(ConfigError::InvalidScanTasks);
        }
        self.executor.validate()
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    num_shards: Option<usize>,
    dim: Option<usize>,
    num_workers: Option<usize>,
    scan_tasks: Option<usize>,
}

impl StoreConfigBuilder {
    /// Set the number of shards.
    pub fn num_shards(mut self, num_shards: usize) -> Self {
        self.num_shards = Some(num_shards);
        self
    }

    /// Fix the embedding dimension.
    pub fn dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    /// Set the number of executor worker threads.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    /// Set the number of tasks each scan is split into.
    pub fn scan_tasks(mut self, scan_tasks: usize) -> Self {
        self.scan_tasks = Some(scan_tasks);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> StoreConfig {
        let default = StoreConfig::default();
        StoreConfig {
            num_shards: self.num_shards.unwrap_or(default.num_shards),
            dim: self.dim.or(default.dim),
            executor: ExecutorConfig {
                num_workers: self.num_workers.or(default.executor.num_workers),
            },
            scan_tasks: self.scan_tasks.or(default.scan_tasks),
        }
    }
}

/// Configuration for a [`ParallelExecutor`](crate::ParallelExecutor).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker threads, or `None` to use the available hardware
    /// concurrency.
    pub num_workers: Option<usize>,
}

impl ExecutorConfig {
    /// Creates a config with an explicit worker count.
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers: Some(num_workers),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == Some(0) {
            return Err(ConfigError::InvalidWorkerCount);
        }
        Ok(())
    }

    /// Resolves the worker count, clamped to at least one.
    pub fn resolved_workers(&self) -> usize {
        self.num_workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Shard count is zero or not a power of two
    #[error("Invalid shard count {0}: must be a power of two")]
    InvalidShardCount(usize),

    /// Fixed dimension is zero
    #[error("Invalid dimension: must be greater than 0")]
    InvalidDimension,

    /// Worker count is zero
    #[error("Invalid worker count: must be at least 1")]
    InvalidWorkerCount,

    /// Scan task count is zero
    #[error("Invalid scan task count: must be at least 1")]
    InvalidScanTasks,

    /// Config file could not be read
    #[error("Config file not found: {0}")]
    ConfigFileNotFound(PathBuf),

    /// Config file could not be parsed
    #[error("Invalid configuration file: {0}")]
    InvalidConfigFile(String),
}

impl From<ConfigError> for StoreError {
    fn from(err: ConfigError) -> Self {
        StoreError::invalid_argument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.num_shards, 16);
        assert_eq!(config.dim, None);
        assert!(config.executor.resolved_workers() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::builder()
            .num_shards(8)
            .dim(4)
            .num_workers(2)
            .scan_tasks(3)
            .build();
        assert_eq!(config.num_shards, 8);
        assert_eq!(config.dim, Some(4));
        assert_eq!(config.executor.resolved_workers(), 2);
        assert_eq!(config.scan_tasks, Some(3));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = StoreConfig::builder().num_shards(12).build();
        assert_eq!(config.validate(), Err(ConfigError::InvalidShardCount(12)));

        let config = StoreConfig::builder().num_shards(0).build();
        assert_eq!(config.validate(), Err(ConfigError::InvalidShardCount(0)));

        let config = StoreConfig::builder().dim(0).build();
        assert_eq!(config.validate(), Err(ConfigError::InvalidDimension));

        let config = StoreConfig::builder().num_workers(0).build();
        assert_eq!(config.validate(), Err(ConfigError::InvalidWorkerCount));

        let config = StoreConfig::builder().scan_tasks(0).build();
        assert_eq!(config.validate(), Err(ConfigError::InvalidScanTasks));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = StoreConfig::from_json_str(r#"{"num_shards": 4, "dim": 2}"#).unwrap();
        assert_eq!(config.num_shards, 4);
        assert_eq!(config.dim, Some(2));
        assert_eq!(config.executor, ExecutorConfig::default());
    }

    #[test]
    fn test_from_json_validates() {
        let err = StoreConfig::from_json_str(r#"{"num_shards": 3}"#).unwrap_err();
        assert_eq!(err, ConfigError::InvalidShardCount(3));

        let err = StoreConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfigFile(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"num_shards": 64, "executor": {{"num_workers": 3}}, "scan_tasks": 6}}"#
        )
        .unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.num_shards, 64);
        assert_eq!(config.executor.num_workers, Some(3));
        assert_eq!(config.scan_tasks, Some(6));

        let missing = StoreConfig::from_file("/nonexistent/dynemb.json").unwrap_err();
        assert!(matches!(missing, ConfigError::ConfigFileNotFound(_)));
    }

    #[test]
    fn test_config_error_converts_to_invalid_argument() {
        let err: StoreError = ConfigError::InvalidWorkerCount.into();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
}

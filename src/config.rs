use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::harvest::formats::OutputFormat;
use crate::harvest::partition::{KeyRange, TaskSource};
use crate::harvest::traits::ConfigurationError;

/// Highest known character id when sampling every tenth id.
pub const DEFAULT_MAX_KEY: u64 = 35_261_910;
/// Concurrent fetches. Much higher gets residential IPs blocked.
pub const DEFAULT_WORKER_COUNT: usize = 20;
pub const DEFAULT_STRIDE: u64 = 10;

/// Run configuration. Read once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Inclusive upper bound of the key range
    pub max_key: u64,
    /// Maximum number of concurrent fetches
    pub worker_count: usize,
    /// Distance between consecutive keys
    pub stride: u64,
    /// First key; defaults to `stride`, so keys are multiples of the stride
    pub start_key: Option<u64>,
    /// Number of key partitions; defaults to `worker_count`
    pub partition_count: Option<usize>,
    /// Upper bound for a single fetcher call
    pub fetch_timeout_ms: Option<u64>,
    pub output: PathBuf,
    pub format: OutputFormat,
    /// Root URL of the record service
    pub base_url: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_key: DEFAULT_MAX_KEY,
            worker_count: DEFAULT_WORKER_COUNT,
            stride: DEFAULT_STRIDE,
            start_key: None,
            partition_count: None,
            fetch_timeout_ms: None,
            output: PathBuf::from("characters.csv"),
            format: OutputFormat::Csv,
            base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl HarvestConfig {
    /// Loads a JSON configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidFile`] if the file cannot be read
    /// or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::InvalidFile(format!("{}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigurationError::InvalidFile(format!("{}: {}", path.display(), e)))
    }

    pub fn start_key(&self) -> u64 {
        self.start_key.unwrap_or(self.stride)
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count.unwrap_or(self.worker_count)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.worker_count == 0 {
            return Err(ConfigurationError::ZeroWorkers);
        }
        if self.stride == 0 {
            return Err(ConfigurationError::ZeroStride);
        }
        if self.start_key() == 0 {
            return Err(ConfigurationError::ZeroStartKey);
        }
        if self.partition_count() == 0 {
            return Err(ConfigurationError::ZeroPartitions);
        }
        if self.start_key() > self.max_key {
            return Err(ConfigurationError::EmptyRange {
                start: self.start_key(),
                max: self.max_key,
            });
        }
        Ok(())
    }

    /// Validates the configuration and builds the run's [`TaskSource`].
    pub fn task_source(&self) -> Result<TaskSource, ConfigurationError> {
        self.validate()?;
        let range = KeyRange::new(self.start_key(), self.max_key, self.stride)?;
        TaskSource::new(range, self.partition_count())
    }
}

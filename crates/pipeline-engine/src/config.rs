//! Engine configuration
//!
//! Capacities and storage keys used by the history log, the undo stack and
//! the batch runner. Every field has a default, so a partial JSON document
//! (or none at all) is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, storage_keys};
use crate::error::{PipelineError, Result};

/// Configuration for the pipeline engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum execution records kept in the history log (oldest evicted first)
    pub max_records: usize,
    /// Maximum snapshots kept on the undo/redo stack
    pub max_history_size: usize,
    /// Worker count for batch operations
    pub batch_concurrency: usize,
    /// Storage key of the execution history log
    pub history_key: String,
    /// Storage key prefix for saved pipeline definitions
    pub library_prefix: String,
    /// zstd level for undo snapshots (1-22)
    pub snapshot_compression_level: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_records: defaults::MAX_RECORDS,
            max_history_size: defaults::MAX_HISTORY_SIZE,
            batch_concurrency: defaults::BATCH_CONCURRENCY,
            history_key: storage_keys::EXECUTION_HISTORY.to_string(),
            library_prefix: storage_keys::LIBRARY_PREFIX.to_string(),
            snapshot_compression_level: defaults::SNAPSHOT_COMPRESSION_LEVEL,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No engine config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        log::info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_records == 0 {
            return Err(PipelineError::Config("maxRecords must be at least 1".to_string()));
        }
        if self.max_history_size == 0 {
            return Err(PipelineError::Config("maxHistorySize must be at least 1".to_string()));
        }
        if self.batch_concurrency == 0 {
            return Err(PipelineError::Config("batchConcurrency must be at least 1".to_string()));
        }
        if self.history_key.is_empty() {
            return Err(PipelineError::Config("historyKey must not be empty".to_string()));
        }
        if !(1..=22).contains(&self.snapshot_compression_level) {
            return Err(PipelineError::Config(format!(
                "snapshotCompressionLevel must be between 1 and 22, got {}",
                self.snapshot_compression_level
            )));
        }
        Ok(())
    }
}

//! Configuration module for actorflow
//!
//! This module handles:
//! - Job configuration (training flag, batch cadence) read by every actor
//! - Runtime settings for the threaded scheduler
//! - Plan files (`.toml` or `.json`) bundling the configuration with a graph plan
//!
//! Configuration is never global. The runtime wraps `JobConfig` in an `Arc`
//! and threads it through actor construction.
//!
//! # Example
//!
//! ```ignore
//! use actorflow::config::PlanFile;
//!
//! let plan_file = PlanFile::load("train.toml")?;
//! plan_file.config.validate()?;
//! ```

use crate::error::{ActorFlowError, Result};
use crate::runtime::GraphPlan;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of pieces in one training batch
pub const DEFAULT_PIECES_PER_BATCH: u64 = 4;

/// Default number of batches in a run
pub const DEFAULT_TOTAL_BATCH_NUM: u64 = 8;

/// Default inbox capacity per actor
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Default idle poll interval for actor threads in milliseconds
pub const DEFAULT_IDLE_POLL_MS: u64 = 10;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,actorflow=debug";

// ==================== Job Config ====================

/// Process-wide, read-only job description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Training (model versions advance, snapshots are exported) or inference
    #[serde(default = "default_is_train")]
    pub is_train: bool,

    /// Number of pieces that make up one batch
    #[serde(default = "default_pieces_per_batch")]
    pub pieces_per_batch: u64,

    /// Number of batches in the whole run
    #[serde(default = "default_total_batch_num")]
    pub total_batch_num: u64,

    /// A forward-model snapshot is exported every this many batches
    #[serde(default = "default_batches_per_snapshot")]
    pub batches_per_snapshot: u64,
}

fn default_is_train() -> bool {
    true
}

fn default_pieces_per_batch() -> u64 {
    DEFAULT_PIECES_PER_BATCH
}

fn default_total_batch_num() -> u64 {
    DEFAULT_TOTAL_BATCH_NUM
}

fn default_batches_per_snapshot() -> u64 {
    1
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            is_train: default_is_train(),
            pieces_per_batch: default_pieces_per_batch(),
            total_batch_num: default_total_batch_num(),
            batches_per_snapshot: default_batches_per_snapshot(),
        }
    }
}

impl JobConfig {
    /// Training job with the given cadence
    pub fn train(pieces_per_batch: u64, total_batch_num: u64) -> Self {
        Self {
            is_train: true,
            pieces_per_batch,
            total_batch_num,
            ..Self::default()
        }
    }

    /// Inference job with the given cadence
    pub fn inference(pieces_per_batch: u64, total_batch_num: u64) -> Self {
        Self {
            is_train: false,
            pieces_per_batch,
            total_batch_num,
            ..Self::default()
        }
    }

    pub fn with_batches_per_snapshot(mut self, batches: u64) -> Self {
        self.batches_per_snapshot = batches;
        self
    }

    /// Check the cadence values are usable
    pub fn validate(&self) -> Result<()> {
        if self.pieces_per_batch == 0 {
            return Err(ActorFlowError::Config(
                "pieces_per_batch must be positive".to_string(),
            ));
        }
        if self.batches_per_snapshot == 0 {
            return Err(ActorFlowError::Config(
                "batches_per_snapshot must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Total number of pieces in the run
    pub fn total_pieces(&self) -> u64 {
        self.total_batch_num * self.pieces_per_batch
    }

    /// Batch a piece belongs to
    pub fn batch_id(&self, piece_id: u64) -> u64 {
        piece_id / self.pieces_per_batch
    }

    /// Whether `piece_id` closes its batch
    pub fn is_last_piece_in_batch(&self, piece_id: u64) -> bool {
        (piece_id + 1) % self.pieces_per_batch == 0
    }

    /// Whether the forward-model snapshot of `batch_id` must be exported
    pub fn need_model_save(&self, batch_id: u64) -> bool {
        (batch_id + 1) % self.batches_per_snapshot == 0 || batch_id + 1 == self.total_batch_num
    }

    /// Last piece that may run on `model_version_id` given a staleness bound
    ///
    /// Version `v` covers the window ending with batch `v + staleness`.
    pub fn last_piece_id_for_model_version(&self, staleness: u64, model_version_id: u64) -> u64 {
        (model_version_id + staleness + 1) * self.pieces_per_batch - 1
    }
}

// ==================== Runtime Settings ====================

/// Settings of the threaded scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Capacity of each actor's inbox channel
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// How long an idle actor thread waits before re-checking the running flag
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Tracing filter used by the binary when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_inbox_capacity() -> usize {
    DEFAULT_INBOX_CAPACITY
}

fn default_idle_poll_ms() -> u64 {
    DEFAULT_IDLE_POLL_MS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            inbox_capacity: default_inbox_capacity(),
            idle_poll_ms: default_idle_poll_ms(),
            log_filter: default_log_filter(),
        }
    }
}

// ==================== Runtime Config ====================

/// Complete configuration of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub job: JobConfig,

    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl RuntimeConfig {
    pub fn new(job: JobConfig) -> Self {
        Self {
            job,
            runtime: RuntimeSettings::default(),
        }
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.job.validate()?;
        if self.runtime.inbox_capacity == 0 {
            return Err(ActorFlowError::Config(
                "inbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ActorFlowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ActorFlowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            ActorFlowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

// ==================== Plan File ====================

/// A runnable plan: configuration plus the compiled graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub config: RuntimeConfig,

    pub plan: GraphPlan,
}

impl PlanFile {
    pub fn new(config: RuntimeConfig, plan: GraphPlan) -> Self {
        Self { config, plan }
    }

    /// Load a plan file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ActorFlowError::Config(format!("Failed to read plan file {:?}: {}", path, e))
        })?;

        let plan_file: PlanFile = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                ActorFlowError::Config(format!("Failed to parse plan file {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                ActorFlowError::Config(format!("Failed to parse plan file {:?}: {}", path, e))
            })?
        };

        plan_file.config.validate()?;
        Ok(plan_file)
    }

    /// Save the plan file, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ActorFlowError::Config(format!("Failed to create plan directory: {}", e))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };

        std::fs::write(path, content).map_err(|e| {
            ActorFlowError::Config(format!("Failed to write plan file {:?}: {}", path, e))
        })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

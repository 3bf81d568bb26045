//! Governor settings loaded from `GOVERNOR_*` environment variables

use crate::error::Result;
use crate::models::StorageEngine;
use crate::skip::EvaluationOrder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Initial configuration for every governor component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorSettings {
    /// Engine of the shared storage handle
    #[serde(default)]
    pub storage_engine: StorageEngine,

    /// Force parallel-safe mode: tests tagged serial are skipped
    #[serde(default)]
    pub parallel_safe: bool,

    #[serde(default)]
    pub skip_slow: bool,

    #[serde(default)]
    pub skip_integration: bool,

    #[serde(default)]
    pub skip_external: bool,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub errors_only: bool,

    /// Directory receiving metric exports
    #[serde(default = "default_metrics_dir")]
    pub metrics_dir: PathBuf,

    /// Tag attached to events, logs and exports
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub skip_evaluation_order: EvaluationOrder,

    /// Pool optimizer period in seconds
    #[serde(default = "default_pool_interval")]
    pub pool_interval_secs: u64,

    /// Parallelism optimizer period in seconds
    #[serde(default = "default_parallelism_interval")]
    pub parallelism_interval_secs: u64,

    /// Skip-condition self-tuning period in seconds
    #[serde(default = "default_skip_tuning_interval")]
    pub skip_tuning_interval_secs: u64,

    /// Initial parallelism ceiling; 0 picks the CPU count
    #[serde(default)]
    pub initial_parallelism: usize,
}

fn default_metrics_dir() -> PathBuf {
    PathBuf::from("test-metrics")
}

fn default_environment() -> String {
    "test".to_string()
}

fn default_pool_interval() -> u64 {
    30
}

fn default_parallelism_interval() -> u64 {
    10
}

fn default_skip_tuning_interval() -> u64 {
    60
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            storage_engine: StorageEngine::default(),
            parallel_safe: false,
            skip_slow: false,
            skip_integration: false,
            skip_external: false,
            verbose: false,
            errors_only: false,
            metrics_dir: default_metrics_dir(),
            environment: default_environment(),
            skip_evaluation_order: EvaluationOrder::default(),
            pool_interval_secs: default_pool_interval(),
            parallelism_interval_secs: default_parallelism_interval(),
            skip_tuning_interval_secs: default_skip_tuning_interval(),
            initial_parallelism: 0,
        }
    }
}

impl GovernorSettings {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GOVERNOR").try_parsing(true))
            .build()?;
        Self::from_config(config)
    }

    /// Deserialize from an already built configuration
    pub fn from_config(config: config::Config) -> Result<Self> {
        Ok(config.try_deserialize()?)
    }

    pub fn pool_interval(&self) -> Duration {
        Duration::from_secs(self.pool_interval_secs.max(1))
    }

    pub fn parallelism_interval(&self) -> Duration {
        Duration::from_secs(self.parallelism_interval_secs.max(1))
    }

    pub fn skip_tuning_interval(&self) -> Duration {
        Duration::from_secs(self.skip_tuning_interval_secs.max(1))
    }

    /// Ceiling the parallelism controller starts with
    pub fn initial_ceiling(&self) -> usize {
        if self.initial_parallelism == 0 {
            num_cpus::get().max(1)
        } else {
            self.initial_parallelism
        }
    }

    /// Tracing filter directive implied by the verbosity flags
    ///
    /// Returns `None` when neither flag is set so the caller can fall back
    /// to `RUST_LOG`.
    pub fn log_filter(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.errors_only {
            Some("error")
        } else {
            None
        }
    }
}

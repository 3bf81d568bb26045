//! Daemon configuration

use anyhow::{Context, Result};
use serde::Deserialize;

/// Daemon configuration, read from `GOVERNOR_DAEMON_*`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DaemonConfig {
    /// API server port for health/metrics/state
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Tests in the soak workload; 0 disables it
    #[serde(default = "default_workload_tests")]
    pub workload_tests: usize,

    /// Every Nth storage statement fails with a deadlock; 0 disables
    #[serde(default = "default_failure_interval")]
    pub failure_interval: u64,

    /// Simulated work per test in milliseconds
    #[serde(default = "default_work_ms")]
    pub work_ms: u64,
}

fn default_api_port() -> u16 {
    8080
}

fn default_workload_tests() -> usize {
    200
}

fn default_failure_interval() -> u64 {
    25
}

fn default_work_ms() -> u64 {
    20
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            workload_tests: default_workload_tests(),
            failure_interval: default_failure_interval(),
            work_ms: default_work_ms(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GOVERNOR_DAEMON").try_parsing(true))
            .build()
            .context("failed to read daemon configuration")?;

        config
            .try_deserialize()
            .context("invalid daemon configuration")
    }
}

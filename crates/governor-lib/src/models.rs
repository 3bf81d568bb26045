//! Core data models shared by the governor components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Point-in-time view of process resource pressure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// CPU utilisation proxy in [0, 1]
    pub cpu_utilization: f64,
    /// Memory utilisation proxy in [0, 1]
    pub memory_utilization: f64,
    /// Live lightweight tasks on the runtime
    pub active_tasks: usize,
    /// Samples in which resident memory shrank
    pub reclaim_cycles: u64,
    pub resident_bytes: u64,
    pub memory_limit_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Snapshot with the given proxies and no other signal
    pub fn with_utilization(cpu_utilization: f64, memory_utilization: f64) -> Self {
        Self {
            cpu_utilization: cpu_utilization.clamp(0.0, 1.0),
            memory_utilization: memory_utilization.clamp(0.0, 1.0),
            active_tasks: 0,
            reclaim_cycles: 0,
            resident_bytes: 0,
            memory_limit_bytes: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Storage engine behind the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    /// In-process engine, tiny pool
    #[default]
    Sqlite,
    #[serde(alias = "postgresql")]
    Postgres,
    Mysql,
}

impl StorageEngine {
    /// Lightweight engines run in-process and get a tiny pool
    pub fn is_lightweight(&self) -> bool {
        matches!(self, StorageEngine::Sqlite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEngine::Sqlite => "sqlite",
            StorageEngine::Postgres => "postgres",
            StorageEngine::Mysql => "mysql",
        }
    }
}

impl fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(StorageEngine::Sqlite),
            "postgres" | "postgresql" => Ok(StorageEngine::Postgres),
            "mysql" | "mariadb" => Ok(StorageEngine::Mysql),
            other => Err(format!("unknown storage engine: {}", other)),
        }
    }
}

/// Outcome of a test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Running,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Running => "running",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowest and highest priority accepted anywhere in the governor
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Clamp a priority into [1, 10]
pub fn clamp_priority(priority: i32) -> u8 {
    priority.clamp(MIN_PRIORITY as i32, MAX_PRIORITY as i32) as u8
}

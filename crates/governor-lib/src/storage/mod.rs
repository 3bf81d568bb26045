//! Storage handle abstraction
//!
//! The governor never talks to a database driver directly. It consumes:
//! - pool statistics and pool setting updates
//! - raw statement execution for maintenance commands
//!
//! Transient contention errors are retried by `RetryExecutor`.

mod maintenance;
mod memory;
mod retry;

pub use maintenance::{validate_identifier, CleanupReport, TableCleaner};
pub use memory::{ConnectionLease, InMemoryStorage};
pub use retry::{RetryExecutor, RetryPolicy};

use crate::error::StorageError;
use crate::models::StorageEngine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of connection pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Configured maximum open connections
    pub max_open: u32,
    /// Connections currently open (in use + idle)
    pub open: u32,
    pub in_use: u32,
    pub idle: u32,
    /// Total requests that had to wait for a connection
    pub wait_count: u64,
    /// Cumulative time spent waiting, in milliseconds
    pub wait_duration_ms: u64,
}

impl PoolStats {
    /// In-use / max-open, 0 when the pool is unbounded
    pub fn utilization(&self) -> f64 {
        if self.max_open == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max_open as f64
        }
    }
}

/// Settings pushed down to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime: Duration,
    pub max_idle_time: Duration,
}

/// Generic storage handle shared by all test executions
#[async_trait]
pub trait StorageHandle: Send + Sync {
    /// Engine behind this handle
    fn engine(&self) -> StorageEngine;

    /// Read current pool statistics; fails on a closed handle
    fn pool_stats(&self) -> Result<PoolStats, StorageError>;

    /// Apply new pool bounds
    fn apply_pool_settings(&self, settings: &PoolSettings) -> Result<(), StorageError>;

    /// Execute a raw statement, returning affected rows
    async fn execute(&self, statement: &str) -> Result<u64, StorageError>;
}

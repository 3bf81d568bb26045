//! Per-test telemetry
//!
//! This module provides:
//! - `TestSession`: live builder for one test's record
//! - `TelemetryCollector`: append-only log of finished records
//! - Summaries and JSON/CSV/text exports of the log

mod collector;
mod export;
mod session;
mod summary;

pub use collector::{TelemetryCollector, TelemetryConfig};
pub use export::{load_metrics, ExportDocument, ExportFormat, CSV_HEADER};
pub use session::{TestSession, DROPPED_SESSION_ERROR};
pub use summary::{EngineBreakdown, MetricsSummary, SlowTest, SLOWEST_TESTS};

use crate::models::{StorageEngine, TestStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of storage operation recorded against a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseOp {
    Create,
    Update,
    Delete,
    Query,
}

/// Storage work done by one test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseOperations {
    pub records_created: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub queries: u64,
    /// Cumulative time spent in storage calls, in milliseconds
    pub query_time_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionCounts {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
}

/// Resident memory around a test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub start_resident_bytes: u64,
    pub end_resident_bytes: u64,
    pub memory_utilization: f64,
}

impl MemorySnapshot {
    /// Growth in resident bytes over the test, negative when memory shrank
    pub fn delta_bytes(&self) -> i64 {
        self.end_resident_bytes as i64 - self.start_resident_bytes as i64
    }
}

/// Finished (or in-progress) record of one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: f64,
    pub status: TestStatus,
    pub database_engine: StorageEngine,
    pub parallel: bool,
    pub memory: MemorySnapshot,
    pub database: DatabaseOperations,
    pub assertions: AssertionCounts,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub error: Option<String>,
}

impl TestMetrics {
    pub fn new(name: impl Into<String>, database_engine: StorageEngine, parallel: bool) -> Self {
        Self {
            name: name.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0.0,
            status: TestStatus::Running,
            database_engine,
            parallel,
            memory: MemorySnapshot::default(),
            database: DatabaseOperations::default(),
            assertions: AssertionCounts::default(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            error: None,
        }
    }
}

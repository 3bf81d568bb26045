use super::{DatabaseOp, TelemetryCollector, TestMetrics};
use crate::models::TestStatus;
use chrono::Utc;
use std::time::{Duration, Instant};

/// Error recorded for a session dropped before `end`
pub const DROPPED_SESSION_ERROR: &str = "session dropped without end";

/// Live record of one running test
///
/// Appended to the collector's log by `end`, or as failed when dropped.
pub struct TestSession {
    metrics: TestMetrics,
    started: Instant,
    collector: TelemetryCollector,
    finished: bool,
}

impl TestSession {
    pub(crate) fn new(metrics: TestMetrics, collector: TelemetryCollector) -> Self {
        Self {
            metrics,
            started: Instant::now(),
            collector,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.metrics.name
    }

    /// Current state of the record
    pub fn metrics(&self) -> &TestMetrics {
        &self.metrics
    }

    pub fn add_assertion(&mut self, passed: bool) {
        let assertions = &mut self.metrics.assertions;
        assertions.total += 1;
        if passed {
            assertions.passed += 1;
        } else {
            assertions.failed += 1;
        }
    }

    /// Record `count` rows (or queries) of `kind` that took `duration`
    pub fn add_database_op(&mut self, kind: DatabaseOp, count: u64, duration: Duration) {
        let database = &mut self.metrics.database;
        match kind {
            DatabaseOp::Create => database.records_created += count,
            DatabaseOp::Update => database.records_updated += count,
            DatabaseOp::Delete => database.records_deleted += count,
            DatabaseOp::Query => {}
        }
        database.queries += if kind == DatabaseOp::Query { count } else { 1 };
        database.query_time_ms += duration.as_secs_f64() * 1000.0;
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metrics.metadata.insert(key.into(), value.into());
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.metrics.tags.push(tag.into());
    }

    pub fn set_parallel(&mut self, parallel: bool) {
        self.metrics.parallel = parallel;
    }

    /// Finish the test and append its record
    pub fn end(mut self, status: TestStatus, error: Option<String>) -> TestMetrics {
        self.finish(status, error)
    }

    fn finish(&mut self, status: TestStatus, error: Option<String>) -> TestMetrics {
        self.finished = true;
        self.metrics.end_time = Some(Utc::now());
        self.metrics.duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.status = status;
        self.metrics.error = error;
        if let Some(snapshot) = self.collector.sample() {
            self.metrics.memory.end_resident_bytes = snapshot.resident_bytes;
            self.metrics.memory.memory_utilization = snapshot.memory_utilization;
        }

        let record = self.metrics.clone();
        self.collector.record(record.clone());
        record
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(TestStatus::Failed, Some(DROPPED_SESSION_ERROR.to_string()));
        }
    }
}

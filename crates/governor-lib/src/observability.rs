//! Observability infrastructure for the governor
//!
//! Provides:
//! - Prometheus metrics (ceiling, pool bounds, resource proxies, test counters)
//! - Structured JSON logging with tracing

use crate::parallelism::ParallelismEvent;
use crate::pool::PoolOptimizationEvent;
use crate::skip::SkipEvent;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Histogram buckets for test durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Inner metrics structure that holds the actual Prometheus metrics
struct GovernorMetricsInner {
    registry: Registry,
    parallelism_ceiling: IntGauge,
    active_tests: IntGauge,
    pool_max_connections: IntGauge,
    pool_max_idle: IntGauge,
    cpu_utilization: Gauge,
    memory_utilization: Gauge,
    tests_started: IntCounter,
    tests_completed: IntCounter,
    tests_failed: IntCounter,
    tests_skipped: IntCounter,
    storage_retries: IntCounter,
    optimization_events: IntCounterVec,
    test_duration_seconds: Histogram,
}

impl GovernorMetricsInner {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("test_governor".to_string()), None)?;

        let parallelism_ceiling = IntGauge::new(
            "parallelism_ceiling",
            "Current maximum number of concurrently admitted tests",
        )?;
        let active_tests = IntGauge::new("active_tests", "Tests currently executing")?;
        let pool_max_connections = IntGauge::new(
            "pool_max_connections",
            "Maximum open connections configured on the storage pool",
        )?;
        let pool_max_idle = IntGauge::new(
            "pool_max_idle",
            "Maximum idle connections configured on the storage pool",
        )?;
        let cpu_utilization = Gauge::new("cpu_utilization_ratio", "CPU utilisation proxy (0-1)")?;
        let memory_utilization =
            Gauge::new("memory_utilization_ratio", "Memory utilisation proxy (0-1)")?;
        let tests_started = IntCounter::new("tests_started_total", "Tests started")?;
        let tests_completed = IntCounter::new("tests_completed_total", "Tests that passed")?;
        let tests_failed = IntCounter::new("tests_failed_total", "Tests that failed")?;
        let tests_skipped = IntCounter::new("tests_skipped_total", "Tests skipped by a condition")?;
        let storage_retries = IntCounter::new(
            "storage_retries_total",
            "Storage operations retried after transient contention",
        )?;
        let optimization_events = IntCounterVec::new(
            Opts::new(
                "optimization_events_total",
                "Optimizer decisions by component and outcome",
            ),
            &["component", "outcome"],
        )?;
        let test_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("test_duration_seconds", "Wall-clock duration of finished tests")
                .buckets(DURATION_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(parallelism_ceiling.clone()))?;
        registry.register(Box::new(active_tests.clone()))?;
        registry.register(Box::new(pool_max_connections.clone()))?;
        registry.register(Box::new(pool_max_idle.clone()))?;
        registry.register(Box::new(cpu_utilization.clone()))?;
        registry.register(Box::new(memory_utilization.clone()))?;
        registry.register(Box::new(tests_started.clone()))?;
        registry.register(Box::new(tests_completed.clone()))?;
        registry.register(Box::new(tests_failed.clone()))?;
        registry.register(Box::new(tests_skipped.clone()))?;
        registry.register(Box::new(storage_retries.clone()))?;
        registry.register(Box::new(optimization_events.clone()))?;
        registry.register(Box::new(test_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            parallelism_ceiling,
            active_tests,
            pool_max_connections,
            pool_max_idle,
            cpu_utilization,
            memory_utilization,
            tests_started,
            tests_completed,
            tests_failed,
            tests_skipped,
            storage_retries,
            optimization_events,
            test_duration_seconds,
        })
    }
}

/// Governor metrics for Prometheus exposition
///
/// Each instance owns its registry; clones share the same metrics.
#[derive(Clone)]
pub struct GovernorMetrics {
    inner: Arc<GovernorMetricsInner>,
}

impl GovernorMetrics {
    /// Create and register a fresh metric set
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            inner: Arc::new(GovernorMetricsInner::new()?),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode_text(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn set_parallelism_ceiling(&self, ceiling: usize) {
        self.inner.parallelism_ceiling.set(ceiling as i64);
    }

    pub fn set_active_tests(&self, active: usize) {
        self.inner.active_tests.set(active as i64);
    }

    pub fn set_pool_limits(&self, max_connections: u32, max_idle: u32) {
        self.inner.pool_max_connections.set(max_connections as i64);
        self.inner.pool_max_idle.set(max_idle as i64);
    }

    pub fn set_resource_utilization(&self, cpu: f64, memory: f64) {
        self.inner.cpu_utilization.set(cpu);
        self.inner.memory_utilization.set(memory);
    }

    pub fn inc_tests_started(&self) {
        self.inner.tests_started.inc();
    }

    /// Count a finished test and record its duration
    pub fn record_test_finished(&self, success: bool, duration: Duration) {
        if success {
            self.inner.tests_completed.inc();
        } else {
            self.inner.tests_failed.inc();
        }
        self.inner
            .test_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn inc_tests_skipped(&self) {
        self.inner.tests_skipped.inc();
    }

    pub fn inc_storage_retries(&self) {
        self.inner.storage_retries.inc();
    }

    /// Count one optimizer decision
    pub fn inc_optimization_event(&self, component: &str, changed: bool) {
        let outcome = if changed { "adjusted" } else { "unchanged" };
        self.inner
            .optimization_events
            .with_label_values(&[component, outcome])
            .inc();
    }
}

/// Structured logger for governor events
///
/// Provides consistent JSON-formatted logging for optimizer decisions,
/// skips, retries and exports.
#[derive(Clone)]
pub struct StructuredLogger {
    environment: String,
}

impl StructuredLogger {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Log governor startup
    pub fn log_startup(&self, version: &str, engine: &str, ceiling: usize) {
        info!(
            event = "governor_started",
            environment = %self.environment,
            version = %version,
            storage_engine = %engine,
            parallelism_ceiling = ceiling,
            "Test governor started"
        );
    }

    /// Log governor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "governor_shutdown",
            environment = %self.environment,
            reason = %reason,
            "Test governor shutting down"
        );
    }

    /// Log a connection pool decision
    pub fn log_pool_optimization(&self, event: &PoolOptimizationEvent) {
        if event.changed() {
            info!(
                event = "pool_optimized",
                environment = %self.environment,
                old_max = event.old.max_connections,
                new_max = event.new.max_connections,
                old_idle = event.old.max_idle,
                new_idle = event.new.max_idle,
                lifetime_secs = event.new.conn_max_lifetime.as_secs(),
                cpu = event.snapshot.cpu_utilization,
                memory = event.snapshot.memory_utilization,
                reason = %event.reason,
                "Connection pool adjusted"
            );
        } else {
            debug!(
                event = "pool_optimized",
                environment = %self.environment,
                max = event.new.max_connections,
                reason = %event.reason,
                "Connection pool unchanged"
            );
        }
    }

    /// Log a parallelism decision
    pub fn log_parallelism_optimization(&self, event: &ParallelismEvent) {
        if event.old_ceiling != event.new_ceiling {
            info!(
                event = "parallelism_optimized",
                environment = %self.environment,
                old_ceiling = event.old_ceiling,
                new_ceiling = event.new_ceiling,
                active_tests = event.active_tests,
                cpu = event.snapshot.cpu_utilization,
                memory = event.snapshot.memory_utilization,
                reason = %event.reason,
                "Parallelism ceiling adjusted"
            );
        } else {
            debug!(
                event = "parallelism_optimized",
                environment = %self.environment,
                ceiling = event.new_ceiling,
                active_tests = event.active_tests,
                reason = %event.reason,
                "Parallelism ceiling unchanged"
            );
        }
    }

    /// Log a skip decision
    pub fn log_skip(&self, event: &SkipEvent) {
        if event.should_run {
            return;
        }
        info!(
            event = "test_skipped",
            environment = %self.environment,
            test = %event.test_name,
            category = ?event.category,
            reason = %event.reason,
            "Test skipped"
        );
    }

    /// Log a skip condition priority change
    pub fn log_skip_tuning(&self, condition: &str, old_priority: u8, new_priority: u8, rate: f64) {
        info!(
            event = "skip_condition_tuned",
            environment = %self.environment,
            condition = %condition,
            old_priority = old_priority,
            new_priority = new_priority,
            skip_rate = rate,
            "Skip condition priority adjusted"
        );
    }

    /// Log a retry of a storage operation
    pub fn log_retry(&self, operation: &str, attempt: u32, delay: Duration, error: &str) {
        warn!(
            event = "storage_retry",
            environment = %self.environment,
            operation = %operation,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient storage error, retrying"
        );
    }

    /// Log a storage operation that ran out of attempts
    pub fn log_retries_exhausted(&self, operation: &str, attempts: u32, error: &str) {
        warn!(
            event = "storage_retries_exhausted",
            environment = %self.environment,
            operation = %operation,
            attempts = attempts,
            error = %error,
            "Storage operation failed after all retries"
        );
    }

    /// Log a metrics export
    pub fn log_export(&self, format: &str, path: &Path, records: usize) {
        info!(
            event = "metrics_exported",
            environment = %self.environment,
            format = %format,
            path = %path.display(),
            records = records,
            "Exported test metrics"
        );
    }
}

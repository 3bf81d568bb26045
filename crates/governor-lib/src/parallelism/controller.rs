use super::{ConcurrencyLimiter, ParallelismConfig};
use crate::health::{components, HealthRegistry};
use crate::history::{BoundedHistory, HistorySummary, DEFAULT_HISTORY_CAPACITY};
use crate::models::{clamp_priority, ResourceSnapshot};
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::resource::{ResourceSampler, WorkloadGauge};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info};

pub const REASON_LOW_USAGE: &str = "low resource usage";
pub const REASON_HIGH_USAGE: &str = "high resource usage";
pub const REASON_LOW_ACTIVITY: &str = "low activity";
pub const REASON_SATURATED: &str = "saturated with headroom";
pub const REASON_STABLE: &str = "stable";

/// One in-flight test execution
#[derive(Debug, Clone, Serialize)]
pub struct TestExecution {
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    started: Instant,
    pub expected_duration: Option<Duration>,
    pub weight: f64,
    pub priority: u8,
}

impl TestExecution {
    pub fn new(name: impl Into<String>, priority: i32, weight: f64) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            expected_duration: None,
            weight: if weight.is_finite() && weight > 0.0 { weight } else { 1.0 },
            priority: clamp_priority(priority),
        }
    }

    pub fn with_expected_duration(mut self, expected: Duration) -> Self {
        self.expected_duration = Some(expected);
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// One parallelism decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelismEvent {
    pub timestamp: DateTime<Utc>,
    pub old_ceiling: usize,
    pub new_ceiling: usize,
    pub reason: String,
    pub active_tests: usize,
    /// Mean elapsed time of the active executions, in milliseconds
    pub average_duration_ms: f64,
    pub snapshot: ResourceSnapshot,
}

/// Live controller view returned by `get_current_metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelismMetrics {
    pub ceiling: usize,
    pub max_ceiling: usize,
    pub active_tests: usize,
    pub completed_tests: u64,
    pub failed_tests: u64,
    pub average_duration_ms: f64,
    pub auto_optimizing: bool,
    pub snapshot: ResourceSnapshot,
}

#[derive(Debug, Default)]
struct ExecutionState {
    active: HashMap<String, TestExecution>,
    completed: u64,
    failed: u64,
}

impl ExecutionState {
    fn average_duration_ms(&self) -> f64 {
        if self.active.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .active
            .values()
            .map(|e| e.elapsed().as_secs_f64() * 1000.0)
            .sum();
        total / self.active.len() as f64
    }
}

/// Pick the next ceiling; first matching rule wins
pub fn next_ceiling(
    config: &ParallelismConfig,
    ceiling: usize,
    active: usize,
    snapshot: &ResourceSnapshot,
) -> (usize, &'static str) {
    let max = config.max_ceiling();
    let step = config.step.max(1);
    let cpu = snapshot.cpu_utilization;
    let memory = snapshot.memory_utilization;

    if cpu < config.low_cpu && memory < config.low_memory {
        ((ceiling + step).min(max), REASON_LOW_USAGE)
    } else if cpu > config.high_cpu || memory > config.high_memory {
        (ceiling.saturating_sub(step).max(1), REASON_HIGH_USAGE)
    } else if (active as f64) < ceiling as f64 / 2.0 {
        (ceiling.saturating_sub(1).max(1), REASON_LOW_ACTIVITY)
    } else if active >= ceiling && cpu < config.high_cpu {
        ((ceiling + 1).min(max), REASON_SATURATED)
    } else {
        (ceiling, REASON_STABLE)
    }
}

/// Tracks test executions and tunes the concurrency ceiling
pub struct ParallelismController {
    config: ParallelismConfig,
    sampler: Arc<dyn ResourceSampler>,
    gauge: Arc<WorkloadGauge>,
    ceiling: AtomicUsize,
    state: Mutex<ExecutionState>,
    history: Mutex<BoundedHistory<ParallelismEvent>>,
    limiter: Arc<ConcurrencyLimiter>,
    auto_running: AtomicBool,
    metrics: Option<GovernorMetrics>,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl ParallelismController {
    pub fn new(
        config: ParallelismConfig,
        sampler: Arc<dyn ResourceSampler>,
        gauge: Arc<WorkloadGauge>,
    ) -> Self {
        let ceiling = config.initial_ceiling.clamp(1, config.max_ceiling());
        gauge.set_ceiling(ceiling);

        Self {
            limiter: ConcurrencyLimiter::new(ceiling),
            config,
            sampler,
            gauge,
            ceiling: AtomicUsize::new(ceiling),
            state: Mutex::new(ExecutionState::default()),
            history: Mutex::new(BoundedHistory::new(DEFAULT_HISTORY_CAPACITY)),
            auto_running: AtomicBool::new(false),
            metrics: None,
            logger: None,
            health: None,
        }
    }

    pub fn with_metrics(self, metrics: GovernorMetrics) -> Self {
        metrics.set_parallelism_ceiling(self.ceiling());
        Self {
            metrics: Some(metrics),
            ..self
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &ParallelismConfig {
        &self.config
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::SeqCst)
    }

    /// Admission gate that follows the ceiling while auto-optimizing
    pub fn limiter(&self) -> Arc<ConcurrencyLimiter> {
        Arc::clone(&self.limiter)
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_auto_optimizing(&self) -> bool {
        self.auto_running.load(Ordering::SeqCst)
    }

    /// Register a started execution
    ///
    /// Returns false when an execution with the same name is already
    /// active; the existing entry is kept.
    pub fn start_test(&self, name: &str, priority: i32, weight: f64) -> bool {
        self.start_execution(TestExecution::new(name, priority, weight))
    }

    pub fn start_execution(&self, execution: TestExecution) -> bool {
        let active = {
            let mut state = self.state.lock();
            if state.active.contains_key(&execution.name) {
                debug!(test = %execution.name, "Ignoring duplicate start of active test");
                return false;
            }
            state.active.insert(execution.name.clone(), execution);
            state.active.len()
        };

        self.publish_active(active);
        if let Some(metrics) = &self.metrics {
            metrics.inc_tests_started();
        }
        true
    }

    /// Remove a finished execution, returning its elapsed time
    ///
    /// Unknown names are ignored.
    pub fn finish_test(&self, name: &str, success: bool) -> Option<Duration> {
        let (elapsed, active) = {
            let mut state = self.state.lock();
            let execution = state.active.remove(name)?;
            if success {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
            (execution.elapsed(), state.active.len())
        };

        self.publish_active(active);
        if let Some(metrics) = &self.metrics {
            metrics.record_test_finished(success, elapsed);
        }
        Some(elapsed)
    }

    fn publish_active(&self, active: usize) {
        self.gauge.set_in_flight(active);
        if let Some(metrics) = &self.metrics {
            metrics.set_active_tests(active);
        }
    }

    /// Snapshot of the active executions
    pub fn active_executions(&self) -> Vec<TestExecution> {
        let mut executions: Vec<_> = self.state.lock().active.values().cloned().collect();
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        executions
    }

    pub fn get_current_metrics(&self) -> ParallelismMetrics {
        let (active_tests, completed_tests, failed_tests, average_duration_ms) = {
            let state = self.state.lock();
            (
                state.active.len(),
                state.completed,
                state.failed,
                state.average_duration_ms(),
            )
        };

        ParallelismMetrics {
            ceiling: self.ceiling(),
            max_ceiling: self.config.max_ceiling(),
            active_tests,
            completed_tests,
            failed_tests,
            average_duration_ms,
            auto_optimizing: self.is_auto_optimizing(),
            snapshot: self.sampler.sample(),
        }
    }

    /// Evaluate the rules once and record the decision
    pub fn optimize_parallelism(&self) -> ParallelismEvent {
        let snapshot = self.sampler.sample();
        let (active, average_duration_ms) = {
            let state = self.state.lock();
            (state.active.len(), state.average_duration_ms())
        };

        let old_ceiling = self.ceiling();
        let (new_ceiling, reason) = next_ceiling(&self.config, old_ceiling, active, &snapshot);
        self.ceiling.store(new_ceiling, Ordering::SeqCst);
        self.gauge.set_ceiling(new_ceiling);
        if self.is_auto_optimizing() {
            self.limiter.set_limit(new_ceiling);
        }

        let event = ParallelismEvent {
            timestamp: Utc::now(),
            old_ceiling,
            new_ceiling,
            reason: reason.to_string(),
            active_tests: active,
            average_duration_ms,
            snapshot,
        };
        self.history.lock().push(event.clone());

        if let Some(metrics) = &self.metrics {
            metrics.set_parallelism_ceiling(new_ceiling);
            metrics.set_resource_utilization(
                event.snapshot.cpu_utilization,
                event.snapshot.memory_utilization,
            );
            metrics.inc_optimization_event("parallelism", old_ceiling != new_ceiling);
        }
        if let Some(logger) = &self.logger {
            logger.log_parallelism_optimization(&event);
        }

        event
    }

    /// Recorded decisions, oldest first
    pub fn get_optimization_history(&self) -> Vec<ParallelismEvent> {
        self.history.lock().to_vec()
    }

    pub fn history_summary(&self) -> HistorySummary {
        let history = self.history.lock();
        let mut summary = HistorySummary {
            total_events: history.len(),
            ..Default::default()
        };
        for event in history.iter() {
            if event.old_ceiling != event.new_ceiling {
                summary.adjustments += 1;
            } else {
                summary.unchanged += 1;
            }
            *summary.by_reason.entry(event.reason.clone()).or_insert(0) += 1;
        }
        summary
    }

    pub fn start_auto_optimization(
        self: &Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        self.auto_running.store(true, Ordering::SeqCst);
        self.limiter.set_limit(self.ceiling());
        tokio::spawn(Arc::clone(self).run(shutdown))
    }

    /// Optimize every `optimize_interval` until shutdown, driving the limiter
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.optimize_interval;
        info!(
            interval_secs = period.as_secs(),
            ceiling = self.ceiling(),
            "Starting parallelism optimization loop"
        );

        self.auto_running.store(true, Ordering::SeqCst);
        self.limiter.set_limit(self.ceiling());

        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.optimize_parallelism();
                    if let Some(health) = &self.health {
                        health.set_healthy(components::PARALLELISM).await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down parallelism optimization loop");
                    break;
                }
            }
        }

        self.auto_running.store(false, Ordering::SeqCst);
    }
}

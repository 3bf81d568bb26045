//! Governor facade
//!
//! Builds every component once from settings and a storage handle, shares
//! them by `Arc`, runs the auto-optimization loops and admits tests through
//! skip evaluation, the concurrency limiter, the parallelism controller and
//! a telemetry session.

use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::TestStatus;
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::parallelism::{ParallelismConfig, ParallelismController};
use crate::pool::{ConnectionPoolOptimizer, PoolConfig};
use crate::resource::{ResourceMonitor, ResourceSampler, WorkloadGauge};
use crate::settings::GovernorSettings;
use crate::skip::{SkipEnvironment, SkipGovernor};
use crate::storage::{RetryExecutor, RetryPolicy, StorageHandle, TableCleaner};
use crate::telemetry::{
    DatabaseOp, ExportFormat, TelemetryCollector, TelemetryConfig, TestSession,
};
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// What to run and how to classify it
#[derive(Debug, Clone, PartialEq)]
pub struct TestSpec {
    pub name: String,
    pub tags: Vec<String>,
    pub priority: i32,
    pub weight: f64,
}

impl TestSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            priority: 5,
            weight: 1.0,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Result of `Governor::run_test`
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome<T, E> {
    Skipped { reason: String },
    Passed(T),
    Failed(E),
}

impl<T, E> TestOutcome<T, E> {
    pub fn status(&self) -> TestStatus {
        match self {
            TestOutcome::Skipped { .. } => TestStatus::Skipped,
            TestOutcome::Passed(_) => TestStatus::Passed,
            TestOutcome::Failed(_) => TestStatus::Failed,
        }
    }
}

/// Shared access to the running test's telemetry session
///
/// Calls made after the test finished are ignored.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<Option<TestSession>>>,
}

impl SessionHandle {
    fn new(session: TestSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(Some(session))),
        }
    }

    fn with_session(&self, f: impl FnOnce(&mut TestSession)) {
        if let Some(session) = self.session.lock().as_mut() {
            f(session);
        }
    }

    pub fn add_assertion(&self, passed: bool) {
        self.with_session(|s| s.add_assertion(passed));
    }

    pub fn add_database_op(&self, kind: DatabaseOp, count: u64, duration: Duration) {
        self.with_session(|s| s.add_database_op(kind, count, duration));
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        self.with_session(|s| s.set_metadata(key, value));
    }

    fn take(&self) -> Option<TestSession> {
        self.session.lock().take()
    }
}

/// Finishes a tracked execution exactly once, as failed if never disarmed
struct ActiveExecution<'a> {
    controller: &'a ParallelismController,
    name: &'a str,
    tracked: bool,
}

impl ActiveExecution<'_> {
    fn finish(mut self, success: bool) {
        if self.tracked {
            self.tracked = false;
            self.controller.finish_test(self.name, success);
        }
    }
}

impl Drop for ActiveExecution<'_> {
    fn drop(&mut self) {
        if self.tracked {
            self.controller.finish_test(self.name, false);
        }
    }
}

/// Builder wiring the governor components
pub struct GovernorBuilder {
    settings: GovernorSettings,
    storage: Arc<dyn StorageHandle>,
    sampler: Option<Arc<dyn ResourceSampler>>,
    gauge: Option<Arc<WorkloadGauge>>,
    pool_config: Option<PoolConfig>,
    parallelism_config: Option<ParallelismConfig>,
    skip_probe: Option<SkipEnvironment>,
    retry_policy: RetryPolicy,
    metrics: Option<GovernorMetrics>,
    health: Option<HealthRegistry>,
}

impl GovernorBuilder {
    pub fn new(settings: GovernorSettings, storage: Arc<dyn StorageHandle>) -> Self {
        Self {
            settings,
            storage,
            sampler: None,
            gauge: None,
            pool_config: None,
            parallelism_config: None,
            skip_probe: None,
            retry_policy: RetryPolicy::default(),
            metrics: None,
            health: None,
        }
    }

    /// Replace the process sampler; the gauge still receives workload updates
    pub fn sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn workload_gauge(mut self, gauge: Arc<WorkloadGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = Some(config);
        self
    }

    pub fn parallelism_config(mut self, config: ParallelismConfig) -> Self {
        self.parallelism_config = Some(config);
        self
    }

    pub fn skip_probe(mut self, probe: SkipEnvironment) -> Self {
        self.skip_probe = Some(probe);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn metrics(mut self, metrics: GovernorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Governor> {
        let settings = self.settings;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => GovernorMetrics::new()
                .map_err(|e| crate::error::GovernorError::Config(e.to_string()))?,
        };
        let health = self.health.unwrap_or_default();
        let logger = StructuredLogger::new(settings.environment.clone());

        let parallelism_config = self.parallelism_config.unwrap_or_else(|| {
            ParallelismConfig::default()
                .with_initial_ceiling(settings.initial_ceiling())
                .with_interval(settings.parallelism_interval())
        });
        let gauge = self
            .gauge
            .unwrap_or_else(|| Arc::new(WorkloadGauge::new(parallelism_config.initial_ceiling)));
        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(ResourceMonitor::new(Arc::clone(&gauge))));

        let mut pool_config = self.pool_config.unwrap_or_else(|| {
            PoolConfig::for_engine(self.storage.engine())
                .with_environment(settings.environment.clone())
        });
        pool_config.optimize_interval = settings.pool_interval();

        let retry = Arc::new(
            RetryExecutor::new(self.retry_policy)
                .with_metrics(metrics.clone())
                .with_logger(logger.clone()),
        );

        let pool = Arc::new(
            ConnectionPoolOptimizer::new(
                Arc::clone(&self.storage),
                Arc::clone(&sampler),
                pool_config,
            )
            .with_metrics(metrics.clone())
            .with_logger(logger.clone())
            .with_health(health.clone()),
        );
        pool.apply_current()?;

        let parallelism = Arc::new(
            ParallelismController::new(parallelism_config, Arc::clone(&sampler), Arc::clone(&gauge))
                .with_metrics(metrics.clone())
                .with_logger(logger.clone())
                .with_health(health.clone()),
        );

        let probe = self
            .skip_probe
            .unwrap_or_else(|| SkipEnvironment::detect(&settings));
        let skips = Arc::new(
            SkipGovernor::with_builtins(
                settings.environment.clone(),
                settings.skip_evaluation_order,
                &probe,
            )
            .with_metrics(metrics.clone())
            .with_logger(logger.clone()),
        );

        let telemetry = TelemetryCollector::with_sampler(
            TelemetryConfig {
                metrics_dir: settings.metrics_dir.clone(),
                environment: settings.environment.clone(),
                database_engine: self.storage.engine(),
                parallel: parallelism.ceiling() > 1,
            },
            Arc::clone(&sampler),
            Some(logger.clone()),
        );

        let (shutdown, _) = broadcast::channel(1);

        Ok(Governor {
            settings,
            storage: self.storage,
            sampler,
            metrics,
            logger,
            health,
            retry,
            pool,
            parallelism,
            skips,
            telemetry,
            shutdown,
            loops: Mutex::new(Vec::new()),
        })
    }
}

/// Every governor component, built once and shared
pub struct Governor {
    settings: GovernorSettings,
    storage: Arc<dyn StorageHandle>,
    sampler: Arc<dyn ResourceSampler>,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
    retry: Arc<RetryExecutor>,
    pool: Arc<ConnectionPoolOptimizer>,
    parallelism: Arc<ParallelismController>,
    skips: Arc<SkipGovernor>,
    telemetry: TelemetryCollector,
    shutdown: broadcast::Sender<()>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Governor {
    pub fn builder(settings: GovernorSettings, storage: Arc<dyn StorageHandle>) -> GovernorBuilder {
        GovernorBuilder::new(settings, storage)
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<dyn StorageHandle> {
        &self.storage
    }

    pub fn sampler(&self) -> &Arc<dyn ResourceSampler> {
        &self.sampler
    }

    pub fn metrics(&self) -> &GovernorMetrics {
        &self.metrics
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn retry(&self) -> &Arc<RetryExecutor> {
        &self.retry
    }

    pub fn pool(&self) -> &Arc<ConnectionPoolOptimizer> {
        &self.pool
    }

    pub fn parallelism(&self) -> &Arc<ParallelismController> {
        &self.parallelism
    }

    pub fn skips(&self) -> &Arc<SkipGovernor> {
        &self.skips
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    /// Table cleaner sharing the governor's storage and retry policy
    /// Export the telemetry log, reporting the outcome as telemetry health
    pub async fn export_metrics(&self, format: ExportFormat) -> Result<PathBuf> {
        let outcome = self.telemetry.export_metrics(format).await;
        self.health.record_pass(components::TELEMETRY, &outcome).await;
        outcome
    }

    pub fn table_cleaner(&self) -> TableCleaner {
        TableCleaner::new(Arc::clone(&self.storage), Arc::clone(&self.retry))
    }

    /// Register components and spawn the pool, parallelism and skip-tuning loops
    pub async fn start(&self) {
        for name in components::ALL {
            self.health.register(name).await;
        }

        let mut loops = Vec::with_capacity(3);
        loops.push(
            self.pool
                .start_auto_optimization(self.shutdown.subscribe()),
        );
        loops.push(
            self.parallelism
                .start_auto_optimization(self.shutdown.subscribe()),
        );
        loops.push(tokio::spawn(skip_tuning_loop(
            Arc::clone(&self.skips),
            self.health.clone(),
            self.settings.skip_tuning_interval(),
            self.shutdown.subscribe(),
        )));
        self.loops.lock().extend(loops);

        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.storage.engine().as_str(),
            self.parallelism.ceiling(),
        );
        self.health.set_ready(true).await;
    }

    /// Signal every loop and wait for them to exit
    pub async fn shutdown(&self, reason: &str) {
        self.logger.log_shutdown(reason);
        self.health.set_ready(false).await;
        // No receivers just means nothing was started
        let _ = self.shutdown.send(());

        let handles: Vec<_> = self.loops.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Optimization loop ended abnormally");
            }
        }
    }

    /// Run one test under governance
    ///
    /// The test is skipped when a skip condition fires. Otherwise it waits
    /// for admission, is tracked by the parallelism controller and gets a
    /// telemetry session that `test` can record into.
    pub async fn run_test<F, Fut, T, E>(&self, spec: &TestSpec, test: F) -> TestOutcome<T, E>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let decision = self.skips.should_skip_test(&spec.name, &spec.tags);
        if decision.skip {
            self.telemetry
                .record_skipped(&spec.name, &spec.tags, &decision.reason);
            return TestOutcome::Skipped {
                reason: decision.reason,
            };
        }

        let _permit = self.parallelism.limiter().acquire().await;
        let execution = ActiveExecution {
            controller: &self.parallelism,
            name: &spec.name,
            tracked: self
                .parallelism
                .start_test(&spec.name, spec.priority, spec.weight),
        };
        let handle = SessionHandle::new(self.telemetry.start_test(&spec.name, &spec.tags));

        let result = test(handle.clone()).await;
        execution.finish(result.is_ok());

        let (status, error) = match &result {
            Ok(_) => (TestStatus::Passed, None),
            Err(e) => (TestStatus::Failed, Some(e.to_string())),
        };
        if let Some(session) = handle.take() {
            session.end(status, error);
        }

        match result {
            Ok(value) => TestOutcome::Passed(value),
            Err(e) => TestOutcome::Failed(e),
        }
    }
}

/// Re-rank skip conditions on a fixed period until shutdown
async fn skip_tuning_loop(
    skips: Arc<SkipGovernor>,
    health: HealthRegistry,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let adjustments = skips.optimize_skip_conditions();
                if !adjustments.is_empty() {
                    info!(adjusted = adjustments.len(), "Skip condition priorities tuned");
                }
                health.set_healthy(components::SKIP_GOVERNOR).await;
            }
            _ = shutdown.recv() => {
                info!("Shutting down skip tuning loop");
                break;
            }
        }
    }
}

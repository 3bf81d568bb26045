//! Connection pool optimizer
//!
//! Reads pool statistics and resource pressure, picks one adjustment rule
//! and pushes the resulting bounds to the storage handle. Runs on demand or
//! as a periodic loop stopped through a broadcast shutdown signal.

use super::config::{
    duration_secs, PoolConfig, MAX_CONNECTIONS_CEILING, MIN_CONN_LIFETIME, WAIT_GROWTH_CEILING,
};
use crate::error::{GovernorError, Result, StorageError};
use crate::health::{components, HealthRegistry};
use crate::history::{BoundedHistory, HistorySummary, DEFAULT_HISTORY_CAPACITY};
use crate::models::ResourceSnapshot;
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::resource::ResourceSampler;
use crate::storage::{PoolStats, StorageHandle};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// In-use / max-open ratio above which the pool grows
pub const HIGH_UTILIZATION: f64 = 0.8;

/// Wait count above which the pool grows
pub const WAIT_COUNT_THRESHOLD: u64 = 100;

const UTILIZATION_GROWTH: u32 = 10;
const WAIT_GROWTH: u32 = 5;
const LIFETIME_STEP: Duration = Duration::from_secs(30);
const MEMORY_IDLE_STEP: u32 = 2;

pub const REASON_CPU: &str = "reduce CPU load";
pub const REASON_MEMORY: &str = "reduce memory via shorter-lived connections";
pub const REASON_UTILIZATION: &str = "raise capacity under high utilization";
pub const REASON_WAIT: &str = "reduce connection wait";
pub const REASON_STABLE: &str = "stable";

/// The three values a decision may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLimits {
    pub max_connections: u32,
    pub max_idle: u32,
    #[serde(with = "duration_secs")]
    pub conn_max_lifetime: Duration,
}

impl From<&PoolConfig> for PoolLimits {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            max_idle: config.max_idle,
            conn_max_lifetime: config.conn_max_lifetime,
        }
    }
}

/// One pool optimizer decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOptimizationEvent {
    pub timestamp: DateTime<Utc>,
    pub old: PoolLimits,
    pub new: PoolLimits,
    pub reason: String,
    pub snapshot: ResourceSnapshot,
    pub stats: PoolStats,
}

impl PoolOptimizationEvent {
    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

/// Live pool view returned by `get_current_metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub stats: PoolStats,
    pub utilization: f64,
    pub snapshot: ResourceSnapshot,
    pub config: PoolConfig,
}

fn scale_idle(idle: u32, old_max: u32, new_max: u32) -> u32 {
    let scaled = if old_max == 0 {
        idle
    } else {
        ((idle as f64) * (new_max as f64) / (old_max as f64)).round() as u32
    };
    scaled.max(1).min(new_max)
}

/// Apply the first matching rule to `config`
///
/// Pure: the returned config always satisfies `min <= max <= 100` and
/// `idle <= max`.
pub fn plan_adjustment(
    config: &PoolConfig,
    stats: &PoolStats,
    snapshot: &ResourceSnapshot,
) -> (PoolConfig, &'static str) {
    let mut next = config.clone();
    let old_max = config.max_connections;

    let reason = if snapshot.cpu_utilization > config.load_threshold {
        next.max_connections = old_max
            .saturating_sub(config.adjustment_step)
            .max(config.min_connections.max(1));
        next.max_idle = scale_idle(config.max_idle, old_max, next.max_connections);
        next.conn_max_lifetime = config
            .conn_max_lifetime
            .saturating_sub(LIFETIME_STEP)
            .max(MIN_CONN_LIFETIME);
        REASON_CPU
    } else if snapshot.memory_utilization > config.memory_threshold {
        next.max_idle = config
            .max_idle
            .saturating_sub(MEMORY_IDLE_STEP)
            .max(1)
            .min(old_max);
        next.conn_max_lifetime = (config.conn_max_lifetime / 2).max(MIN_CONN_LIFETIME);
        REASON_MEMORY
    } else if stats.utilization() > HIGH_UTILIZATION {
        next.max_connections = (old_max + UTILIZATION_GROWTH).min(MAX_CONNECTIONS_CEILING);
        next.max_idle = scale_idle(config.max_idle, old_max, next.max_connections);
        next.conn_max_lifetime = config.conn_max_lifetime + LIFETIME_STEP;
        REASON_UTILIZATION
    } else if stats.wait_count > WAIT_COUNT_THRESHOLD {
        next.max_connections = old_max.max((old_max + WAIT_GROWTH).min(WAIT_GROWTH_CEILING));
        next.max_idle = scale_idle(config.max_idle, old_max, next.max_connections);
        REASON_WAIT
    } else {
        REASON_STABLE
    };

    // Guard against a config that arrived out of bounds
    next.max_connections = next
        .max_connections
        .max(next.min_connections)
        .min(MAX_CONNECTIONS_CEILING);
    next.min_connections = next.min_connections.min(next.max_connections);
    next.max_idle = next.max_idle.min(next.max_connections);

    (next, reason)
}

/// Self-tuning connection pool optimizer
pub struct ConnectionPoolOptimizer {
    storage: Arc<dyn StorageHandle>,
    sampler: Arc<dyn ResourceSampler>,
    config: RwLock<PoolConfig>,
    history: Mutex<BoundedHistory<PoolOptimizationEvent>>,
    metrics: Option<GovernorMetrics>,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl ConnectionPoolOptimizer {
    pub fn new(
        storage: Arc<dyn StorageHandle>,
        sampler: Arc<dyn ResourceSampler>,
        mut config: PoolConfig,
    ) -> Self {
        for correction in config.normalize() {
            warn!(correction = %correction, "Adjusted initial pool configuration");
        }

        Self {
            storage,
            sampler,
            config: RwLock::new(config),
            history: Mutex::new(BoundedHistory::new(DEFAULT_HISTORY_CAPACITY)),
            metrics: None,
            logger: None,
            health: None,
        }
    }

    pub fn with_metrics(mut self, metrics: GovernorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Copy of the current configuration
    pub fn config(&self) -> PoolConfig {
        self.config.read().clone()
    }

    /// Push the current configuration to the storage handle
    pub fn apply_current(&self) -> Result<()> {
        let config = self.config();
        self.storage.apply_pool_settings(&config.to_settings())?;
        if let Some(metrics) = &self.metrics {
            metrics.set_pool_limits(config.max_connections, config.max_idle);
        }
        Ok(())
    }

    /// Replace the configuration, normalizing out-of-bounds values
    pub fn update_config(&self, mut config: PoolConfig) -> Result<()> {
        for correction in config.normalize() {
            warn!(correction = %correction, "Normalized pool configuration update");
        }

        self.storage.apply_pool_settings(&config.to_settings())?;
        if let Some(metrics) = &self.metrics {
            metrics.set_pool_limits(config.max_connections, config.max_idle);
        }
        info!(
            max_connections = config.max_connections,
            max_idle = config.max_idle,
            "Pool configuration updated"
        );
        *self.config.write() = config;
        Ok(())
    }

    /// Current pool statistics and resource pressure
    pub fn get_current_metrics(&self) -> Result<PoolMetrics> {
        let stats = self.storage.pool_stats()?;
        Ok(PoolMetrics {
            utilization: stats.utilization(),
            stats,
            snapshot: self.sampler.sample(),
            config: self.config(),
        })
    }

    /// Run one decision and apply it
    ///
    /// Fails when pool statistics cannot be read or the new bounds cannot
    /// be applied; the previous configuration then stays in effect.
    pub fn optimize_connections(&self) -> Result<PoolOptimizationEvent> {
        let stats = self.storage.pool_stats()?;
        let snapshot = self.sampler.sample();
        let current = self.config();

        let (next, reason) = plan_adjustment(&current, &stats, &snapshot);
        let event = PoolOptimizationEvent {
            timestamp: Utc::now(),
            old: PoolLimits::from(&current),
            new: PoolLimits::from(&next),
            reason: reason.to_string(),
            snapshot,
            stats,
        };

        if event.changed() {
            self.storage.apply_pool_settings(&next.to_settings())?;
            *self.config.write() = next;
        }

        self.history.lock().push(event.clone());

        if let Some(metrics) = &self.metrics {
            metrics.set_pool_limits(event.new.max_connections, event.new.max_idle);
            metrics.set_resource_utilization(
                event.snapshot.cpu_utilization,
                event.snapshot.memory_utilization,
            );
            metrics.inc_optimization_event("pool", event.changed());
        }
        if let Some(logger) = &self.logger {
            logger.log_pool_optimization(&event);
        }

        Ok(event)
    }

    /// Recorded decisions, oldest first
    pub fn optimization_history(&self) -> Vec<PoolOptimizationEvent> {
        self.history.lock().to_vec()
    }

    /// Tally of recorded decisions by reason
    pub fn history_summary(&self) -> HistorySummary {
        let history = self.history.lock();
        let mut summary = HistorySummary {
            total_events: history.len(),
            ..Default::default()
        };
        for event in history.iter() {
            if event.changed() {
                summary.adjustments += 1;
            } else {
                summary.unchanged += 1;
            }
            *summary.by_reason.entry(event.reason.clone()).or_insert(0) += 1;
        }
        summary
    }

    /// Spawn the periodic loop
    pub fn start_auto_optimization(
        self: &Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }

    /// Optimize every `optimize_interval` until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut period = self.config().optimize_interval;
        info!(
            interval_secs = period.as_secs(),
            "Starting connection pool optimization loop"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let config = self.config();
                    if config.auto_optimize {
                        self.optimize_cycle().await;
                    }

                    if config.optimize_interval != period {
                        period = config.optimize_interval;
                        ticker = interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down connection pool optimization loop");
                    break;
                }
            }
        }
    }

    async fn optimize_cycle(&self) {
        let outcome = self.optimize_connections();
        if let Err(e) = &outcome {
            warn!(error = %e, "Pool optimization skipped this cycle");
        }
        if let Some(health) = &self.health {
            health.record_pass(components::POOL_OPTIMIZER, &outcome).await;
            // The pass is the only regular reader of the handle
            match &outcome {
                Err(GovernorError::Storage(StorageError::Closed)) => {
                    health
                        .set_unhealthy(components::STORAGE, StorageError::Closed.to_string())
                        .await
                }
                Err(GovernorError::Storage(e)) => {
                    health.set_degraded(components::STORAGE, e.to_string()).await
                }
                _ => health.set_healthy(components::STORAGE).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::models::StorageEngine;
    use crate::resource::ManualSampler;
    use crate::storage::InMemoryStorage;

    fn optimizer(
        engine: StorageEngine,
        cpu: f64,
        memory: f64,
    ) -> (InMemoryStorage, Arc<ManualSampler>, ConnectionPoolOptimizer) {
        let config = PoolConfig::for_engine(engine);
        let storage = InMemoryStorage::new(engine, config.to_settings());
        let sampler = Arc::new(ManualSampler::new(cpu, memory));
        let optimizer =
            ConnectionPoolOptimizer::new(Arc::new(storage.clone()), sampler.clone(), config);
        (storage, sampler, optimizer)
    }

    fn stats(max_open: u32, in_use: u32, wait_count: u64) -> PoolStats {
        PoolStats {
            max_open,
            open: in_use,
            in_use,
            idle: 0,
            wait_count,
            wait_duration_ms: 0,
        }
    }

    #[test]
    fn test_cpu_pressure_reduces_max_by_step() {
        let (storage, _, optimizer) = optimizer(StorageEngine::Postgres, 0.85, 0.1);

        let event = optimizer.optimize_connections().unwrap();

        assert_eq!(event.reason, REASON_CPU);
        assert_eq!(event.old.max_connections, 50);
        assert_eq!(event.new.max_connections, 45);
        assert_eq!(event.new.max_idle, 9);
        assert_eq!(event.new.conn_max_lifetime, Duration::from_secs(270));
        assert_eq!(storage.settings().max_open, 45);
        assert_eq!(optimizer.config().max_connections, 45);
    }

    #[test]
    fn test_cpu_pressure_floors_at_min() {
        let (_, _, optimizer) = optimizer(StorageEngine::Sqlite, 0.95, 0.0);

        // 5 -> 1 (min), then stays at 1
        let first = optimizer.optimize_connections().unwrap();
        assert_eq!(first.new.max_connections, 1);
        let second = optimizer.optimize_connections().unwrap();
        assert_eq!(second.new.max_connections, 1);
        assert_eq!(second.new.max_idle, 1);
    }

    #[test]
    fn test_memory_pressure_shortens_lifetime() {
        let (_, _, optimizer) = optimizer(StorageEngine::Mysql, 0.2, 0.9);

        let event = optimizer.optimize_connections().unwrap();

        assert_eq!(event.reason, REASON_MEMORY);
        assert_eq!(event.new.max_connections, 50);
        assert_eq!(event.new.max_idle, 8);
        assert_eq!(event.new.conn_max_lifetime, Duration::from_secs(150));
    }

    #[test]
    fn test_high_utilization_grows_pool() {
        let config = PoolConfig::for_engine(StorageEngine::Postgres);
        let (next, reason) = plan_adjustment(
            &config,
            &stats(50, 45, 0),
            &ResourceSnapshot::with_utilization(0.1, 0.1),
        );

        assert_eq!(reason, REASON_UTILIZATION);
        assert_eq!(next.max_connections, 60);
        assert_eq!(next.max_idle, 12);
        assert_eq!(next.conn_max_lifetime, Duration::from_secs(330));
    }

    #[test]
    fn test_wait_growth_never_shrinks() {
        let config = PoolConfig {
            max_connections: 90,
            max_idle: 10,
            ..PoolConfig::for_engine(StorageEngine::Postgres)
        };
        let (next, reason) = plan_adjustment(
            &config,
            &stats(90, 10, 500),
            &ResourceSnapshot::with_utilization(0.1, 0.1),
        );

        assert_eq!(reason, REASON_WAIT);
        assert_eq!(next.max_connections, 90);

        let config = PoolConfig::for_engine(StorageEngine::Postgres);
        let (next, _) = plan_adjustment(
            &config,
            &stats(50, 10, 500),
            &ResourceSnapshot::with_utilization(0.1, 0.1),
        );
        assert_eq!(next.max_connections, 55);
    }

    #[test]
    fn test_stable_leaves_config() {
        let (_, _, optimizer) = optimizer(StorageEngine::Postgres, 0.2, 0.2);
        let before = optimizer.config();

        let event = optimizer.optimize_connections().unwrap();

        assert_eq!(event.reason, REASON_STABLE);
        assert!(!event.changed());
        assert_eq!(optimizer.config(), before);
    }

    #[test]
    fn test_bounds_hold_for_every_rule() {
        let snapshots = [(0.9, 0.1), (0.1, 0.95), (0.1, 0.1)];
        let pool_stats = [stats(100, 95, 0), stats(10, 1, 1000), stats(0, 0, 0)];

        for max in [1u32, 5, 10, 50, 95, 100] {
            for min in [0u32, 1, 10] {
                let config = PoolConfig {
                    min_connections: min.min(max),
                    max_connections: max,
                    max_idle: max,
                    ..PoolConfig::for_engine(StorageEngine::Postgres)
                };
                for (cpu, memory) in snapshots {
                    for s in &pool_stats {
                        let (next, _) = plan_adjustment(
                            &config,
                            s,
                            &ResourceSnapshot::with_utilization(cpu, memory),
                        );
                        assert!(next.is_valid(), "invalid config {:?}", next);
                        assert!(next.conn_max_lifetime >= MIN_CONN_LIFETIME);
                    }
                }
            }
        }
    }

    #[test]
    fn test_closed_storage_keeps_previous_config() {
        let (storage, _, optimizer) = optimizer(StorageEngine::Postgres, 0.9, 0.0);
        storage.close();

        let err = optimizer.optimize_connections().unwrap_err();
        assert!(matches!(err, GovernorError::Storage(StorageError::Closed)));
        assert!(optimizer.get_current_metrics().is_err());
        assert_eq!(optimizer.config().max_connections, 50);
        assert!(optimizer.optimization_history().is_empty());
    }

    #[tokio::test]
    async fn test_closed_storage_reported_to_health() {
        let (storage, _, optimizer) = optimizer(StorageEngine::Postgres, 0.9, 0.0);
        let health = HealthRegistry::new();
        let optimizer = optimizer.with_health(health.clone());
        health.set_ready(true).await;

        optimizer.optimize_cycle().await;
        let report = health.health().await;
        assert_eq!(report.status, ComponentStatus::Healthy);
        assert_eq!(
            report.components[components::STORAGE].status,
            ComponentStatus::Healthy
        );

        storage.close();
        optimizer.optimize_cycle().await;

        let report = health.health().await;
        assert_eq!(
            report.components[components::POOL_OPTIMIZER].status,
            ComponentStatus::Degraded
        );
        let storage_health = &report.components[components::STORAGE];
        assert_eq!(storage_health.status, ComponentStatus::Unhealthy);
        assert_eq!(storage_health.message.as_deref(), Some("storage handle is closed"));

        let readiness = health.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Unhealthy components: storage")
        );
    }

    #[test]
    fn test_update_config_normalizes() {
        let (storage, _, optimizer) = optimizer(StorageEngine::Postgres, 0.0, 0.0);

        optimizer
            .update_config(PoolConfig {
                min_connections: 30,
                max_connections: 20,
                max_idle: 40,
                ..PoolConfig::for_engine(StorageEngine::Postgres)
            })
            .unwrap();

        let config = optimizer.config();
        assert_eq!(config.max_connections, 30);
        assert_eq!(config.max_idle, 30);
        assert_eq!(storage.settings().max_open, 30);
    }

    #[test]
    fn test_history_summary() {
        let (_, sampler, optimizer) = optimizer(StorageEngine::Postgres, 0.9, 0.0);
        optimizer.optimize_connections().unwrap();
        optimizer.optimize_connections().unwrap();
        sampler.set_load(0.1, 0.1);
        optimizer.optimize_connections().unwrap();

        let summary = optimizer.history_summary();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.adjustments, 2);
        assert_eq!(summary.by_reason.get(REASON_CPU), Some(&2));
        assert_eq!(summary.by_reason.get(REASON_STABLE), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_loop_stops_on_shutdown() {
        let (_, _, optimizer) = optimizer(StorageEngine::Postgres, 0.9, 0.0);
        let optimizer = Arc::new(optimizer);
        let (tx, rx) = broadcast::channel(1);

        let handle = optimizer.start_auto_optimization(rx);
        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        // Two 30s ticks elapsed before shutdown
        assert_eq!(optimizer.optimization_history().len(), 2);
        assert_eq!(optimizer.config().max_connections, 40);
    }
}

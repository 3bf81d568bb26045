//! Connection pool optimization
//!
//! Sizes the shared storage pool from resource pressure and pool
//! statistics. Decisions are recorded in a bounded history.

mod config;
mod optimizer;

pub use config::{PoolConfig, MAX_CONNECTIONS_CEILING, MIN_CONN_LIFETIME, WAIT_GROWTH_CEILING};
pub use optimizer::{
    plan_adjustment, ConnectionPoolOptimizer, PoolLimits, PoolMetrics, PoolOptimizationEvent,
    HIGH_UTILIZATION, REASON_CPU, REASON_MEMORY, REASON_STABLE, REASON_UTILIZATION, REASON_WAIT,
    WAIT_COUNT_THRESHOLD,
};

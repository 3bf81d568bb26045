//! Parallelism control
//!
//! This module provides:
//! - `ParallelismController`: active-execution bookkeeping and ceiling rules
//! - `ConcurrencyLimiter`: the admission gate the ceiling is applied to
//! - Auto-optimization loop with broadcast shutdown

mod controller;
mod limiter;

#[cfg(test)]
mod tests;

pub use controller::{
    next_ceiling, ParallelismController, ParallelismEvent, ParallelismMetrics, TestExecution,
    REASON_HIGH_USAGE, REASON_LOW_ACTIVITY, REASON_LOW_USAGE, REASON_SATURATED, REASON_STABLE,
};
pub use limiter::{ConcurrencyLimiter, ConcurrencyPermit};

use std::time::Duration;

/// Ceiling bounds and rule thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelismConfig {
    /// Starting ceiling, clamped to `[1, max_ceiling]`
    pub initial_ceiling: usize,
    /// CPU count the bounds derive from
    pub cpu_count: usize,
    /// Change applied by the resource-driven rules
    pub step: usize,
    pub low_cpu: f64,
    pub low_memory: f64,
    pub high_cpu: f64,
    pub high_memory: f64,
    pub optimize_interval: Duration,
}

impl ParallelismConfig {
    /// Defaults derived from `cpu_count`
    pub fn for_cpus(cpu_count: usize) -> Self {
        let cpu_count = cpu_count.max(1);
        Self {
            initial_ceiling: cpu_count,
            cpu_count,
            step: (cpu_count / 4).max(1),
            low_cpu: 0.3,
            low_memory: 0.4,
            high_cpu: 0.8,
            high_memory: 0.85,
            optimize_interval: Duration::from_secs(10),
        }
    }

    pub fn with_initial_ceiling(mut self, ceiling: usize) -> Self {
        self.initial_ceiling = ceiling;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.optimize_interval = interval;
        self
    }

    /// Upper bound on the ceiling: four executions per CPU
    pub fn max_ceiling(&self) -> usize {
        self.cpu_count.max(1) * 4
    }
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self::for_cpus(num_cpus::get())
    }
}

//! Resource pressure sampling
//!
//! This module provides cheap proxies for CPU and memory pressure:
//! - `ResourceMonitor` reads runtime task counts and procfs/cgroup memory
//! - `ManualSampler` returns caller-controlled values for synthetic load
//! - `WorkloadGauge` carries in-flight executions from the parallelism
//!   controller into the CPU proxy

mod manual;
mod process;

pub use manual::ManualSampler;
pub use process::{
    parse_memory_limit, parse_meminfo_total, parse_statm_resident, ResourceMonitor,
    TASKS_PER_CPU_BASELINE,
};

use crate::models::ResourceSnapshot;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of resource snapshots consumed by the optimizers
pub trait ResourceSampler: Send + Sync {
    /// Take a best-effort snapshot; never fails
    fn sample(&self) -> ResourceSnapshot;
}

/// In-flight executions versus the current concurrency ceiling
#[derive(Debug)]
pub struct WorkloadGauge {
    in_flight: AtomicUsize,
    ceiling: AtomicUsize,
}

impl WorkloadGauge {
    pub fn new(ceiling: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            ceiling: AtomicUsize::new(ceiling.max(1)),
        }
    }

    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.store(count, Ordering::Relaxed);
    }

    pub fn set_ceiling(&self, ceiling: usize) {
        self.ceiling.store(ceiling.max(1), Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::Relaxed)
    }

    /// In-flight / ceiling, clamped to [0, 1]
    pub fn load_ratio(&self) -> f64 {
        let ceiling = self.ceiling().max(1) as f64;
        (self.in_flight() as f64 / ceiling).clamp(0.0, 1.0)
    }
}

impl Default for WorkloadGauge {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_gauge_ratio() {
        let gauge = WorkloadGauge::new(4);
        assert_eq!(gauge.load_ratio(), 0.0);

        gauge.set_in_flight(2);
        assert!((gauge.load_ratio() - 0.5).abs() < f64::EPSILON);

        // Oversubscription saturates at 1
        gauge.set_in_flight(20);
        assert_eq!(gauge.load_ratio(), 1.0);
    }

    #[test]
    fn test_workload_gauge_zero_ceiling() {
        let gauge = WorkloadGauge::new(0);
        assert_eq!(gauge.ceiling(), 1);
        gauge.set_ceiling(0);
        assert_eq!(gauge.ceiling(), 1);
    }
}

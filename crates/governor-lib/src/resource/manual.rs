//! Caller-controlled sampler for synthetic load

use super::ResourceSampler;
use crate::models::ResourceSnapshot;
use chrono::Utc;
use parking_lot::Mutex;

/// Sampler whose proxies are set explicitly
#[derive(Debug)]
pub struct ManualSampler {
    current: Mutex<ResourceSnapshot>,
}

impl ManualSampler {
    pub fn new(cpu_utilization: f64, memory_utilization: f64) -> Self {
        Self {
            current: Mutex::new(ResourceSnapshot::with_utilization(
                cpu_utilization,
                memory_utilization,
            )),
        }
    }

    /// An unloaded process
    pub fn idle() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn set_cpu(&self, cpu_utilization: f64) {
        self.current.lock().cpu_utilization = cpu_utilization.clamp(0.0, 1.0);
    }

    pub fn set_memory(&self, memory_utilization: f64) {
        self.current.lock().memory_utilization = memory_utilization.clamp(0.0, 1.0);
    }

    pub fn set_load(&self, cpu_utilization: f64, memory_utilization: f64) {
        let mut current = self.current.lock();
        current.cpu_utilization = cpu_utilization.clamp(0.0, 1.0);
        current.memory_utilization = memory_utilization.clamp(0.0, 1.0);
    }

    pub fn set_active_tasks(&self, active_tasks: usize) {
        self.current.lock().active_tasks = active_tasks;
    }
}

impl Default for ManualSampler {
    fn default() -> Self {
        Self::idle()
    }
}

impl ResourceSampler for ManualSampler {
    fn sample(&self) -> ResourceSnapshot {
        let mut snapshot = self.current.lock().clone();
        snapshot.timestamp = Utc::now();
        snapshot
    }
}

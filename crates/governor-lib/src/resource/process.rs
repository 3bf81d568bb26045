//! Process-local resource monitor
//!
//! Derives proxy utilisation ratios from signals that are cheap to read:
//! - live task count on the tokio runtime
//! - in-flight test executions relative to the concurrency ceiling
//! - resident set size from /proc/self/statm
//! - memory limit from cgroup v2 memory.max, cgroup v1
//!   memory.limit_in_bytes or /proc/meminfo

use super::{ResourceSampler, WorkloadGauge};
use crate::models::ResourceSnapshot;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Live tasks per CPU considered a fully loaded runtime
pub const TASKS_PER_CPU_BASELINE: usize = 8;

/// Page size assumed when converting statm pages to bytes
const PAGE_SIZE: u64 = 4096;

/// Default resource monitor backed by runtime and procfs signals
pub struct ResourceMonitor {
    cpu_count: usize,
    gauge: Arc<WorkloadGauge>,
    proc_path: PathBuf,
    cgroup_root: PathBuf,
    last_resident: Mutex<u64>,
    reclaim_cycles: AtomicU64,
}

impl ResourceMonitor {
    /// Create a monitor reading the real /proc and /sys/fs/cgroup
    pub fn new(gauge: Arc<WorkloadGauge>) -> Self {
        Self::with_paths(gauge, "/proc", "/sys/fs/cgroup")
    }

    /// Create monitor with custom proc and cgroup roots (for testing)
    pub fn with_paths(
        gauge: Arc<WorkloadGauge>,
        proc_path: impl Into<PathBuf>,
        cgroup_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cpu_count: num_cpus::get().max(1),
            gauge,
            proc_path: proc_path.into(),
            cgroup_root: cgroup_root.into(),
            last_resident: Mutex::new(0),
            reclaim_cycles: AtomicU64::new(0),
        }
    }

    /// Override the CPU count used for the task baseline
    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count.max(1);
        self
    }

    pub fn gauge(&self) -> &Arc<WorkloadGauge> {
        &self.gauge
    }

    /// Blend the runtime task ratio with the workload ratio
    pub fn cpu_proxy(&self, active_tasks: usize) -> f64 {
        let baseline = (self.cpu_count * TASKS_PER_CPU_BASELINE) as f64;
        let task_ratio = (active_tasks as f64 / baseline).min(1.0);
        let workload_ratio = self.gauge.load_ratio();
        (0.5 * task_ratio + 0.5 * workload_ratio).clamp(0.0, 1.0)
    }

    fn active_tasks() -> usize {
        tokio::runtime::Handle::try_current()
            .map(|handle| handle.metrics().num_alive_tasks())
            .unwrap_or(0)
    }

    fn read_resident_bytes(&self) -> Option<u64> {
        let content = std::fs::read_to_string(self.proc_path.join("self/statm")).ok()?;
        parse_statm_resident(&content, PAGE_SIZE)
    }

    fn read_memory_limit(&self) -> Option<u64> {
        let total = std::fs::read_to_string(self.proc_path.join("meminfo"))
            .ok()
            .and_then(|content| parse_meminfo_total(&content));

        let cgroup_limit = ["memory.max", "memory/memory.limit_in_bytes"]
            .iter()
            .filter_map(|file| std::fs::read_to_string(self.cgroup_root.join(file)).ok())
            .find_map(|content| parse_memory_limit(&content));

        match (cgroup_limit, total) {
            // v1 reports "unlimited" as a huge number; ignore limits above physical memory
            (Some(limit), Some(total)) if limit < total => Some(limit),
            (Some(limit), None) => Some(limit),
            (_, total) => total,
        }
    }

    fn track_reclaim(&self, resident: u64) -> u64 {
        let mut last = self.last_resident.lock();
        if *last > 0 && resident < *last {
            self.reclaim_cycles.fetch_add(1, Ordering::Relaxed);
        }
        *last = resident;
        self.reclaim_cycles.load(Ordering::Relaxed)
    }
}

impl ResourceSampler for ResourceMonitor {
    fn sample(&self) -> ResourceSnapshot {
        let active_tasks = Self::active_tasks();
        let cpu_utilization = self.cpu_proxy(active_tasks);

        let resident_bytes = self.read_resident_bytes().unwrap_or(0);
        let memory_limit_bytes = self.read_memory_limit().unwrap_or(0);
        let memory_utilization = if memory_limit_bytes > 0 {
            (resident_bytes as f64 / memory_limit_bytes as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let reclaim_cycles = self.track_reclaim(resident_bytes);

        trace!(
            cpu = cpu_utilization,
            memory = memory_utilization,
            active_tasks,
            "Sampled resource pressure"
        );

        ResourceSnapshot {
            cpu_utilization,
            memory_utilization,
            active_tasks,
            reclaim_cycles,
            resident_bytes,
            memory_limit_bytes,
            timestamp: Utc::now(),
        }
    }
}

/// Parse /proc/self/statm; returns resident bytes
pub fn parse_statm_resident(content: &str, page_size: u64) -> Option<u64> {
    content
        .split_whitespace()
        .nth(1)
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| pages * page_size)
}

/// Parse the MemTotal line of /proc/meminfo; returns bytes
pub fn parse_meminfo_total(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? != "MemTotal:" {
            return None;
        }
        let kib: u64 = parts.next()?.parse().ok()?;
        Some(kib * 1024)
    })
}

/// Parse a cgroup memory limit file; "max" means unbounded
pub fn parse_memory_limit(content: &str) -> Option<u64> {
    let value = content.trim();
    if value == "max" {
        return None;
    }
    value.parse().ok().filter(|limit| *limit > 0)
}

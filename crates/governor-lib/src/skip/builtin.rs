//! Conditions registered on every governor

use super::{SkipCategory, SkipCondition};
use crate::settings::GovernorSettings;

/// Flags and probes the built-in conditions read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipEnvironment {
    pub skip_slow: bool,
    pub skip_integration: bool,
    pub skip_external: bool,
    /// Parallel-safe mode forced: serial tests are skipped
    pub parallel_safe: bool,
    pub cpu_count: usize,
    /// Operating system as reported by `std::env::consts::OS`
    pub os: String,
}

impl SkipEnvironment {
    /// Probe the current process
    pub fn detect(settings: &GovernorSettings) -> Self {
        Self {
            skip_slow: settings.skip_slow,
            skip_integration: settings.skip_integration,
            skip_external: settings.skip_external,
            parallel_safe: settings.parallel_safe,
            cpu_count: num_cpus::get(),
            os: std::env::consts::OS.to_string(),
        }
    }

    /// Tags naming platforms other than the current one
    fn foreign_platform_tags(&self) -> Vec<String> {
        ["linux", "macos", "windows"]
            .iter()
            .filter(|os| **os != self.os)
            .map(|os| format!("{}_only", os))
            .collect()
    }
}

/// The six conditions every governor starts with, as `(key, condition)`
pub fn builtin_conditions(env: &SkipEnvironment) -> Vec<(&'static str, SkipCondition)> {
    let skip_slow = env.skip_slow;
    let skip_integration = env.skip_integration;
    let skip_external = env.skip_external;
    let parallel_safe = env.parallel_safe;
    let low_cpu = env.cpu_count < 2;

    vec![
        (
            "slow_tests",
            SkipCondition::new(
                "slow_tests",
                "Slow tests disabled (GOVERNOR_SKIP_SLOW)",
                SkipCategory::Performance,
                move || skip_slow,
            )
            .with_priority(5)
            .with_tags(["slow"])
            .with_metadata("flag", "GOVERNOR_SKIP_SLOW"),
        ),
        (
            "integration_tests",
            SkipCondition::new(
                "integration_tests",
                "Integration tests disabled (GOVERNOR_SKIP_INTEGRATION)",
                SkipCategory::Integration,
                move || skip_integration,
            )
            .with_priority(6)
            .with_tags(["integration"])
            .with_metadata("flag", "GOVERNOR_SKIP_INTEGRATION"),
        ),
        (
            "external_dependencies",
            SkipCondition::new(
                "external_dependencies",
                "External dependencies unavailable (GOVERNOR_SKIP_EXTERNAL)",
                SkipCategory::Integration,
                move || skip_external,
            )
            .with_priority(7)
            .with_tags(["external", "network"])
            .with_metadata("flag", "GOVERNOR_SKIP_EXTERNAL"),
        ),
        (
            "non_parallel_safe",
            SkipCondition::new(
                "non_parallel_safe",
                "Test is not parallel-safe (GOVERNOR_PARALLEL_SAFE)",
                SkipCategory::Environment,
                move || parallel_safe,
            )
            .with_priority(8)
            .with_tags(["serial", "non_parallel"])
            .with_metadata("flag", "GOVERNOR_PARALLEL_SAFE"),
        ),
        (
            "platform_specific",
            SkipCondition::new(
                "platform_specific",
                format!("Test targets a platform other than {}", env.os),
                SkipCategory::Platform,
                || true,
            )
            .with_priority(9)
            .with_tags(env.foreign_platform_tags())
            .with_metadata("os", env.os.clone()),
        ),
        (
            "resource_intensive",
            SkipCondition::new(
                "resource_intensive",
                "Resource-intensive test needs at least 2 CPUs",
                SkipCategory::Resource,
                move || low_cpu,
            )
            .with_priority(4)
            .with_tags(["resource_intensive", "heavy"])
            .with_metadata("cpu_count", env.cpu_count.to_string()),
        ),
    ]
}

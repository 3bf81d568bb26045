use super::TestMetrics;
use crate::models::TestStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Entries in the slowest-tests list
pub const SLOWEST_TESTS: usize = 5;

/// Per-engine slice of the summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineBreakdown {
    pub tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub average_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowTest {
    pub name: String,
    pub duration_ms: f64,
    pub status: TestStatus,
}

/// Aggregate view of the telemetry log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Passed / (passed + failed); skipped tests do not count
    pub success_rate: f64,
    /// Mean duration of executed (non-skipped) tests
    pub average_duration_ms: f64,
    pub total_assertions: u64,
    pub total_queries: u64,
    pub by_engine: BTreeMap<String, EngineBreakdown>,
    pub slowest: Vec<SlowTest>,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &[TestMetrics]) -> Self {
        let mut summary = MetricsSummary {
            total: metrics.len(),
            ..Default::default()
        };
        let mut executed_duration = 0.0;
        let mut engine_durations: BTreeMap<String, f64> = BTreeMap::new();

        for test in metrics {
            match test.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::Running => {}
            }
            summary.total_assertions += test.assertions.total;
            summary.total_queries += test.database.queries;

            let engine = summary
                .by_engine
                .entry(test.database_engine.to_string())
                .or_default();
            engine.tests += 1;
            match test.status {
                TestStatus::Passed => engine.passed += 1,
                TestStatus::Failed => engine.failed += 1,
                _ => {}
            }

            if test.status != TestStatus::Skipped {
                executed_duration += test.duration_ms;
                *engine_durations
                    .entry(test.database_engine.to_string())
                    .or_insert(0.0) += test.duration_ms;
            }
        }

        let executed = summary.passed + summary.failed;
        if executed > 0 {
            summary.success_rate = summary.passed as f64 / executed as f64;
        }
        let timed = summary.total - summary.skipped;
        if timed > 0 {
            summary.average_duration_ms = executed_duration / timed as f64;
        }
        for (engine, breakdown) in summary.by_engine.iter_mut() {
            let timed = breakdown.passed + breakdown.failed;
            if timed > 0 {
                breakdown.average_duration_ms =
                    engine_durations.get(engine).copied().unwrap_or(0.0) / timed as f64;
            }
        }

        let mut executed_tests: Vec<&TestMetrics> = metrics
            .iter()
            .filter(|t| t.status != TestStatus::Skipped)
            .collect();
        executed_tests.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        summary.slowest = executed_tests
            .into_iter()
            .take(SLOWEST_TESTS)
            .map(|t| SlowTest {
                name: t.name.clone(),
                duration_ms: t.duration_ms,
                status: t.status,
            })
            .collect();

        summary
    }
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test Metrics Summary")?;
        writeln!(f, "====================")?;
        writeln!(f, "Total tests: {}", self.total)?;
        writeln!(f, "Passed: {}", self.passed)?;
        writeln!(f, "Failed: {}", self.failed)?;
        writeln!(f, "Skipped: {}", self.skipped)?;
        writeln!(f, "Success rate: {:.1}%", self.success_rate * 100.0)?;
        writeln!(f, "Average duration: {:.2} ms", self.average_duration_ms)?;
        writeln!(f, "Assertions: {}", self.total_assertions)?;
        writeln!(f, "Queries: {}", self.total_queries)?;

        if !self.by_engine.is_empty() {
            writeln!(f)?;
            writeln!(f, "By database engine:")?;
            for (engine, breakdown) in &self.by_engine {
                writeln!(
                    f,
                    "  {:<10} {} tests, {} passed, {} failed, avg {:.2} ms",
                    engine,
                    breakdown.tests,
                    breakdown.passed,
                    breakdown.failed,
                    breakdown.average_duration_ms
                )?;
            }
        }

        if !self.slowest.is_empty() {
            writeln!(f)?;
            writeln!(f, "Slowest tests:")?;
            for (rank, test) in self.slowest.iter().enumerate() {
                writeln!(
                    f,
                    "  {}. {} ({:.2} ms, {})",
                    rank + 1,
                    test.name,
                    test.duration_ms,
                    test.status
                )?;
            }
        }
        Ok(())
    }
}

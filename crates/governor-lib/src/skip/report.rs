use super::{SkipEvent, SkipStatistics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Skip statistics with the latest skipped tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipReport {
    pub generated_at: DateTime<Utc>,
    pub statistics: SkipStatistics,
    /// Latest skip events, oldest first
    pub recent_skips: Vec<SkipEvent>,
}

impl fmt::Display for SkipReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.statistics;
        writeln!(f, "Skip Report ({})", stats.environment)?;
        writeln!(f, "Generated: {}", self.generated_at.to_rfc3339())?;
        writeln!(
            f,
            "Evaluated: {}  Skipped: {}  Skip ratio: {:.1}%",
            stats.total_evaluations,
            stats.total_skipped,
            stats.skip_ratio * 100.0
        )?;

        if !stats.skipped_by_category.is_empty() {
            writeln!(f)?;
            writeln!(f, "By category:")?;
            for (category, count) in &stats.skipped_by_category {
                writeln!(f, "  {:<14} {}", category, count)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Conditions:")?;
        for condition in &stats.conditions {
            writeln!(
                f,
                "  {:<24} {:<13} p{:<3} checked {:<6} skipped {:<6} rate {:>5.1}%",
                condition.name,
                condition.category.as_str(),
                condition.priority,
                condition.checked,
                condition.skipped,
                condition.skip_rate * 100.0
            )?;
        }

        if !self.recent_skips.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recent skips:")?;
            for event in &self.recent_skips {
                writeln!(f, "  {} - {}", event.test_name, event.reason)?;
            }
        }
        Ok(())
    }
}

//! Skip governance
//!
//! A registry of tag-addressed skip conditions evaluated per test:
//! - `SkipGovernor` evaluates, counts and records every decision
//! - Built-in conditions driven by environment flags and cheap probes
//! - Periodic self-tuning of condition priorities
//! - Text/JSON skip reports

mod builtin;
mod condition;
mod governor;
mod report;


pub use builtin::{builtin_conditions, SkipEnvironment};
pub use condition::{matches_tags, SkipCondition, SkipConditionStats, SkipPredicate};
pub use governor::{
    PriorityAdjustment, SkipDecision, SkipEvent, SkipGovernor, SkipStatistics,
    SKIP_HISTORY_CAPACITY, TUNING_MIN_CHECKS,
};
pub use report::SkipReport;

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of circumstance a condition reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCategory {
    Environment,
    Resource,
    Integration,
    Performance,
    FeatureFlag,
    Platform,
}

impl SkipCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipCategory::Environment => "environment",
            SkipCategory::Resource => "resource",
            SkipCategory::Integration => "integration",
            SkipCategory::Performance => "performance",
            SkipCategory::FeatureFlag => "feature_flag",
            SkipCategory::Platform => "platform",
        }
    }
}

impl fmt::Display for SkipCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order in which registered conditions are evaluated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationOrder {
    /// Registration order; priority is reporting metadata only
    #[default]
    Registration,
    /// Highest priority first, registration order among equals
    Priority,
}

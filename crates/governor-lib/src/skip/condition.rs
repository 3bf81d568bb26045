//! Skip conditions and tag matching

use super::SkipCategory;
use crate::models::{clamp_priority, MAX_PRIORITY, MIN_PRIORITY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Zero-argument predicate deciding whether a condition is active
pub type SkipPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// True when `condition_tags` is empty or shares a tag with `test_tags`
///
/// Comparison ignores ASCII case.
pub fn matches_tags<S: AsRef<str>>(condition_tags: &[String], test_tags: &[S]) -> bool {
    condition_tags.is_empty()
        || condition_tags.iter().any(|tag| {
            test_tags
                .iter()
                .any(|candidate| candidate.as_ref().eq_ignore_ascii_case(tag))
        })
}

/// Registered skip rule
#[derive(Clone)]
pub struct SkipCondition {
    pub name: String,
    pub description: String,
    pub category: SkipCategory,
    pub(crate) priority: u8,
    predicate: SkipPredicate,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub(crate) checked: u64,
    pub(crate) skipped: u64,
}

impl SkipCondition {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        category: SkipCategory,
        predicate: F,
    ) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            priority: 5,
            predicate: Arc::new(predicate),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            checked: 0,
            skipped: 0,
        }
    }

    /// Set the priority, clamped to [1, 10]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Fraction of evaluations that fired
    pub fn skip_rate(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            self.skipped as f64 / self.checked as f64
        }
    }

    pub(crate) fn predicate(&self) -> SkipPredicate {
        Arc::clone(&self.predicate)
    }

    /// Evaluate against a test's tags
    pub fn fires<S: AsRef<str>>(&self, test_tags: &[S]) -> bool {
        matches_tags(&self.tags, test_tags) && (self.predicate)()
    }

    pub(crate) fn raise_priority(&mut self) {
        self.priority = (self.priority + 1).min(MAX_PRIORITY);
    }

    pub(crate) fn lower_priority(&mut self) {
        self.priority = self.priority.saturating_sub(1).max(MIN_PRIORITY);
    }

    pub fn stats(&self) -> SkipConditionStats {
        SkipConditionStats {
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category,
            priority: self.priority,
            tags: self.tags.clone(),
            checked: self.checked,
            skipped: self.skipped,
            skip_rate: self.skip_rate(),
        }
    }
}

impl fmt::Debug for SkipCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipCondition")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .field("checked", &self.checked)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a condition and its counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipConditionStats {
    pub name: String,
    pub description: String,
    pub category: SkipCategory,
    pub priority: u8,
    pub tags: Vec<String>,
    pub checked: u64,
    pub skipped: u64,
    pub skip_rate: f64,
}

use super::{
    builtin_conditions, EvaluationOrder, SkipCategory, SkipCondition, SkipConditionStats,
    SkipEnvironment, SkipPredicate, SkipReport,
};
use crate::history::BoundedHistory;
use crate::observability::{GovernorMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Skip events retained for statistics and reports
pub const SKIP_HISTORY_CAPACITY: usize = 1000;

/// Conditions need this many evaluations before self-tuning touches them
pub const TUNING_MIN_CHECKS: u64 = 10;

const LOW_SKIP_RATE: f64 = 0.1;
const HIGH_SKIP_RATE: f64 = 0.8;
const RECENT_SKIPS_IN_REPORT: usize = 20;

pub(crate) const NO_MATCH_REASON: &str = "no skip condition matched";

/// Answer to `should_skip_test`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipDecision {
    pub skip: bool,
    pub reason: String,
    /// Name of the condition that fired
    pub condition: Option<String>,
    pub category: Option<SkipCategory>,
}

/// Record of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipEvent {
    pub test_name: String,
    pub reason: String,
    pub condition: Option<String>,
    pub category: Option<SkipCategory>,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    pub should_run: bool,
}

/// Aggregate counters over every evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipStatistics {
    pub environment: String,
    pub evaluation_order: EvaluationOrder,
    pub total_evaluations: u64,
    pub total_skipped: u64,
    /// skipped / evaluations, 0 before the first evaluation
    pub skip_ratio: f64,
    pub skipped_by_category: BTreeMap<String, u64>,
    /// Conditions in evaluation order
    pub conditions: Vec<SkipConditionStats>,
}

/// Priority change made by self-tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityAdjustment {
    pub condition: String,
    pub old_priority: u8,
    pub new_priority: u8,
    pub skip_rate: f64,
}

#[derive(Default)]
struct Registry {
    conditions: Vec<SkipCondition>,
    index: HashMap<String, usize>,
    evaluations: u64,
    skipped: u64,
}

impl Registry {
    /// Indices in evaluation order
    fn ordered(&self, order: EvaluationOrder) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.conditions.len()).collect();
        if order == EvaluationOrder::Priority {
            // Stable sort keeps registration order among equal priorities
            indices.sort_by(|a, b| {
                self.conditions[*b]
                    .priority
                    .cmp(&self.conditions[*a].priority)
            });
        }
        indices
    }
}

struct Candidate {
    key: String,
    description: String,
    category: SkipCategory,
    predicate: SkipPredicate,
}

/// Registry of skip conditions consulted before each test
pub struct SkipGovernor {
    environment: String,
    order: EvaluationOrder,
    registry: Mutex<Registry>,
    history: Mutex<BoundedHistory<SkipEvent>>,
    metrics: Option<GovernorMetrics>,
    logger: Option<StructuredLogger>,
}

impl SkipGovernor {
    /// Empty governor
    pub fn new(environment: impl Into<String>, order: EvaluationOrder) -> Self {
        Self {
            environment: environment.into(),
            order,
            registry: Mutex::new(Registry::default()),
            history: Mutex::new(BoundedHistory::new(SKIP_HISTORY_CAPACITY)),
            metrics: None,
            logger: None,
        }
    }

    /// Governor with the six built-in conditions registered
    pub fn with_builtins(
        environment: impl Into<String>,
        order: EvaluationOrder,
        probe: &SkipEnvironment,
    ) -> Self {
        let governor = Self::new(environment, order);
        for (key, condition) in builtin_conditions(probe) {
            governor.register_skip_condition(key, condition);
        }
        governor
    }

    pub fn with_metrics(mut self, metrics: GovernorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn evaluation_order(&self) -> EvaluationOrder {
        self.order
    }

    pub fn condition_count(&self) -> usize {
        self.registry.lock().conditions.len()
    }

    /// Register `condition` under `key`
    ///
    /// Re-registering a key replaces the condition in place, keeping its
    /// registration position and resetting its counters.
    pub fn register_skip_condition(&self, key: impl Into<String>, mut condition: SkipCondition) {
        let key = key.into();
        condition.name = key.clone();
        condition.checked = 0;
        condition.skipped = 0;

        let mut registry = self.registry.lock();
        match registry.index.get(&key).copied() {
            Some(position) => {
                debug!(condition = %key, "Replacing skip condition");
                registry.conditions[position] = condition;
            }
            None => {
                let position = registry.conditions.len();
                registry.conditions.push(condition);
                registry.index.insert(key, position);
            }
        }
    }

    /// Counters and settings of a single condition
    pub fn condition(&self, key: &str) -> Option<SkipConditionStats> {
        let registry = self.registry.lock();
        let position = *registry.index.get(key)?;
        Some(registry.conditions[position].stats())
    }

    /// Decide whether `test_name` should be skipped
    ///
    /// Predicates run outside the registry lock.
    pub fn should_skip_test<S: AsRef<str>>(&self, test_name: &str, tags: &[S]) -> SkipDecision {
        let candidates: Vec<Candidate> = {
            let registry = self.registry.lock();
            registry
                .ordered(self.order)
                .into_iter()
                .map(|i| &registry.conditions[i])
                .filter(|c| super::matches_tags(&c.tags, tags))
                .map(|c| Candidate {
                    key: c.name.clone(),
                    description: c.description.clone(),
                    category: c.category,
                    predicate: c.predicate(),
                })
                .collect()
        };

        let mut evaluated = 0;
        let mut winner = None;
        for candidate in &candidates {
            evaluated += 1;
            if (candidate.predicate)() {
                winner = Some(candidate);
                break;
            }
        }

        {
            let mut registry = self.registry.lock();
            registry.evaluations += 1;
            for candidate in &candidates[..evaluated] {
                if let Some(position) = registry.index.get(&candidate.key).copied() {
                    registry.conditions[position].checked += 1;
                }
            }
            if let Some(candidate) = winner {
                registry.skipped += 1;
                if let Some(position) = registry.index.get(&candidate.key).copied() {
                    registry.conditions[position].skipped += 1;
                }
            }
        }

        let decision = match winner {
            Some(candidate) => SkipDecision {
                skip: true,
                reason: candidate.description.clone(),
                condition: Some(candidate.key.clone()),
                category: Some(candidate.category),
            },
            None => SkipDecision {
                skip: false,
                reason: NO_MATCH_REASON.to_string(),
                condition: None,
                category: None,
            },
        };

        let event = SkipEvent {
            test_name: test_name.to_string(),
            reason: decision.reason.clone(),
            condition: decision.condition.clone(),
            category: decision.category,
            timestamp: Utc::now(),
            environment: self.environment.clone(),
            should_run: !decision.skip,
        };
        if let Some(logger) = &self.logger {
            logger.log_skip(&event);
        }
        self.history.lock().push(event);

        if decision.skip {
            if let Some(metrics) = &self.metrics {
                metrics.inc_tests_skipped();
            }
        }

        decision
    }

    pub fn get_skip_statistics(&self) -> SkipStatistics {
        let registry = self.registry.lock();

        let mut skipped_by_category = BTreeMap::new();
        for condition in &registry.conditions {
            if condition.skipped > 0 {
                *skipped_by_category
                    .entry(condition.category.to_string())
                    .or_insert(0) += condition.skipped;
            }
        }

        let skip_ratio = if registry.evaluations == 0 {
            0.0
        } else {
            registry.skipped as f64 / registry.evaluations as f64
        };

        SkipStatistics {
            environment: self.environment.clone(),
            evaluation_order: self.order,
            total_evaluations: registry.evaluations,
            total_skipped: registry.skipped,
            skip_ratio,
            skipped_by_category,
            conditions: registry
                .ordered(self.order)
                .into_iter()
                .map(|i| registry.conditions[i].stats())
                .collect(),
        }
    }

    /// Most recent `limit` events, oldest first
    pub fn get_skip_history(&self, limit: usize) -> Vec<SkipEvent> {
        self.history.lock().tail(limit)
    }

    /// Nudge priorities of conditions with enough evaluations
    ///
    /// Rarely firing conditions lose a priority point, almost always
    /// firing ones gain one.
    pub fn optimize_skip_conditions(&self) -> Vec<PriorityAdjustment> {
        let mut adjustments = Vec::new();
        {
            let mut registry = self.registry.lock();
            for condition in registry.conditions.iter_mut() {
                if condition.checked < TUNING_MIN_CHECKS {
                    continue;
                }
                let rate = condition.skip_rate();
                let old_priority = condition.priority;
                if rate < LOW_SKIP_RATE {
                    condition.lower_priority();
                } else if rate > HIGH_SKIP_RATE {
                    condition.raise_priority();
                }
                if condition.priority != old_priority {
                    adjustments.push(PriorityAdjustment {
                        condition: condition.name.clone(),
                        old_priority,
                        new_priority: condition.priority,
                        skip_rate: rate,
                    });
                }
            }
        }

        if let Some(logger) = &self.logger {
            for adjustment in &adjustments {
                logger.log_skip_tuning(
                    &adjustment.condition,
                    adjustment.old_priority,
                    adjustment.new_priority,
                    adjustment.skip_rate,
                );
            }
        }
        adjustments
    }

    /// Statistics plus the most recent skips
    pub fn generate_skip_report(&self) -> SkipReport {
        let statistics = self.get_skip_statistics();
        let recent_skips = {
            let history = self.history.lock();
            let mut skips: Vec<SkipEvent> = history
                .iter()
                .rev()
                .filter(|e| !e.should_run)
                .take(RECENT_SKIPS_IN_REPORT)
                .cloned()
                .collect();
            skips.reverse();
            skips
        };

        SkipReport {
            generated_at: Utc::now(),
            statistics,
            recent_skips,
        }
    }
}

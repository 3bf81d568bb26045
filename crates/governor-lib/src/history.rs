//! Fixed-capacity history log
//!
//! Ring buffer shared by the pool, parallelism and skip histories:
//! - FIFO eviction once capacity is reached
//! - Newest-last iteration order
//! - Tail queries for "most recent N" views

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default capacity for optimization histories
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded FIFO log that drops its oldest entry when full
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
    /// Entries evicted since creation
    dropped: u64,
}

impl<T> BoundedHistory<T> {
    /// Create a history holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append an entry, evicting the oldest if at capacity
    pub fn push(&mut self, entry: T) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries evicted so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest first; `.rev()` walks newest first
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// Copy of every entry, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    /// Copy of the most recent `limit` entries, oldest first
    pub fn tail(&self, limit: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Per-reason tally over an optimization history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total_events: usize,
    /// Events whose new value differs from the old one
    pub adjustments: usize,
    pub unchanged: usize,
    /// Reason -> occurrences, sorted by reason
    pub by_reason: std::collections::BTreeMap<String, usize>,
}

impl HistorySummary {
    /// Fraction of decisions that changed the tuned value
    pub fn adjustment_rate(&self) -> f64 {
        if self.total_events == 0 {
            0.0
        } else {
            self.adjustments as f64 / self.total_events as f64
        }
    }
}

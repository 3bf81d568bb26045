//! Simulated storage pool
//!
//! Tracks leases against the configured bounds, accounts waits the way a
//! real pool reports them, keeps per-table row counters for maintenance
//! statements, and supports fault injection for contention testing.

use super::{PoolSettings, PoolStats, StorageHandle};
use crate::error::StorageError;
use crate::models::StorageEngine;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Row bookkeeping for one table
#[derive(Debug, Clone, Copy)]
struct TableState {
    rows: u64,
    next_id: u64,
}

impl Default for TableState {
    fn default() -> Self {
        Self { rows: 0, next_id: 1 }
    }
}

#[derive(Debug, Default)]
struct LeaseState {
    open: u32,
    in_use: u32,
}

struct Inner {
    engine: StorageEngine,
    closed: AtomicBool,
    settings: Mutex<PoolSettings>,
    leases: Mutex<LeaseState>,
    released: Notify,
    wait_count: AtomicU64,
    wait_duration_ms: AtomicU64,
    tables: DashMap<String, TableState>,
    statements: Mutex<Vec<String>>,
    injected_failures: Mutex<VecDeque<String>>,
    /// Every Nth statement fails with a deadlock; 0 disables
    failure_interval: AtomicU64,
    executed: AtomicU64,
}

/// In-process storage handle used by the soak workload and tests
#[derive(Clone)]
pub struct InMemoryStorage {
    inner: Arc<Inner>,
}

impl InMemoryStorage {
    pub fn new(engine: StorageEngine, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                closed: AtomicBool::new(false),
                settings: Mutex::new(settings),
                leases: Mutex::new(LeaseState::default()),
                released: Notify::new(),
                wait_count: AtomicU64::new(0),
                wait_duration_ms: AtomicU64::new(0),
                tables: DashMap::new(),
                statements: Mutex::new(Vec::new()),
                injected_failures: Mutex::new(VecDeque::new()),
                failure_interval: AtomicU64::new(0),
                executed: AtomicU64::new(0),
            }),
        }
    }

    /// Close the handle; later stats and statements fail
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.released.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> PoolSettings {
        *self.inner.settings.lock()
    }

    /// Fail the next `count` statements with `message`
    pub fn inject_failures(&self, count: usize, message: impl Into<String>) {
        let message = message.into();
        let mut queue = self.inner.injected_failures.lock();
        for _ in 0..count {
            queue.push_back(message.clone());
        }
    }

    /// Fail every `interval`-th statement with a deadlock error
    pub fn set_failure_interval(&self, interval: u64) {
        self.inner.failure_interval.store(interval, Ordering::Relaxed);
    }

    /// Seed rows into a table
    pub fn insert_rows(&self, table: &str, count: u64) {
        let mut entry = self.inner.tables.entry(table.to_string()).or_default();
        entry.rows += count;
        entry.next_id += count;
    }

    pub fn row_count(&self, table: &str) -> u64 {
        self.inner.tables.get(table).map(|t| t.rows).unwrap_or(0)
    }

    pub fn next_id(&self, table: &str) -> u64 {
        self.inner.tables.get(table).map(|t| t.next_id).unwrap_or(1)
    }

    /// Every statement accepted so far, in order
    pub fn executed_statements(&self) -> Vec<String> {
        self.inner.statements.lock().clone()
    }

    /// Check out a connection, waiting while the pool is exhausted
    pub async fn acquire(&self) -> Result<ConnectionLease, StorageError> {
        let mut waited_since: Option<Instant> = None;

        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.is_closed() {
                return Err(StorageError::Closed);
            }

            {
                let max_open = self.inner.settings.lock().max_open;
                let mut leases = self.inner.leases.lock();
                if max_open == 0 || leases.in_use < max_open {
                    if leases.open == leases.in_use {
                        leases.open += 1;
                    }
                    leases.in_use += 1;

                    if let Some(start) = waited_since {
                        self.inner
                            .wait_duration_ms
                            .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
                    }
                    return Ok(ConnectionLease {
                        storage: self.clone(),
                    });
                }
            }

            if waited_since.is_none() {
                self.inner.wait_count.fetch_add(1, Ordering::Relaxed);
                waited_since = Some(Instant::now());
            }
            released.await;
        }
    }

    fn release(&self) {
        let max_idle = self.inner.settings.lock().max_idle;
        {
            let mut leases = self.inner.leases.lock();
            leases.in_use = leases.in_use.saturating_sub(1);
            // Close connections beyond the idle bound
            while leases.open > leases.in_use + max_idle {
                leases.open -= 1;
            }
        }
        self.inner.released.notify_one();
    }

    fn next_failure(&self) -> Option<String> {
        if let Some(message) = self.inner.injected_failures.lock().pop_front() {
            return Some(message);
        }
        let interval = self.inner.failure_interval.load(Ordering::Relaxed);
        let count = self.inner.executed.fetch_add(1, Ordering::Relaxed) + 1;
        if interval > 0 && count % interval == 0 {
            return Some("Deadlock found when trying to get lock; try restarting transaction".into());
        }
        None
    }

    /// Apply the effect of a maintenance statement to the table counters
    fn apply_statement(&self, statement: &str) -> u64 {
        let normalized = statement.trim().trim_end_matches(';');
        let lower = normalized.to_lowercase();
        let words: Vec<&str> = normalized.split_whitespace().collect();

        if lower.starts_with("delete from sqlite_sequence") {
            // DELETE FROM sqlite_sequence WHERE name = 'table'
            if let Some(table) = normalized.split('\'').nth(1) {
                self.reset_identity(table);
            }
            return 0;
        }
        if lower.starts_with("delete from") && words.len() >= 3 {
            return self.clear_table(words[2]);
        }
        if lower.starts_with("truncate") {
            let table = words
                .iter()
                .skip(1)
                .find(|w| !w.eq_ignore_ascii_case("table"))
                .copied()
                .unwrap_or_default();
            let rows = self.clear_table(table);
            if lower.contains("restart identity") {
                self.reset_identity(table);
            }
            return rows;
        }
        if lower.starts_with("alter table") && lower.contains("auto_increment") && words.len() >= 3 {
            self.reset_identity(words[2]);
            return 0;
        }
        if lower.starts_with("alter sequence") {
            if let Some(sequence) = words.iter().rev().find(|w| w.ends_with("_id_seq")) {
                self.reset_identity(sequence.trim_end_matches("_id_seq"));
            }
            return 0;
        }
        0
    }

    fn clear_table(&self, table: &str) -> u64 {
        match self.inner.tables.get_mut(table) {
            Some(mut state) => std::mem::take(&mut state.rows),
            None => 0,
        }
    }

    fn reset_identity(&self, table: &str) {
        if let Some(mut state) = self.inner.tables.get_mut(table) {
            state.next_id = 1;
        }
    }
}

#[async_trait]
impl StorageHandle for InMemoryStorage {
    fn engine(&self) -> StorageEngine {
        self.inner.engine
    }

    fn pool_stats(&self) -> Result<PoolStats, StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        let max_open = self.inner.settings.lock().max_open;
        let leases = self.inner.leases.lock();
        Ok(PoolStats {
            max_open,
            open: leases.open,
            in_use: leases.in_use,
            idle: leases.open - leases.in_use,
            wait_count: self.inner.wait_count.load(Ordering::Relaxed),
            wait_duration_ms: self.inner.wait_duration_ms.load(Ordering::Relaxed),
        })
    }

    fn apply_pool_settings(&self, settings: &PoolSettings) -> Result<(), StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        *self.inner.settings.lock() = *settings;
        // Raised bounds may admit waiters
        self.inner.released.notify_waiters();
        debug!(
            max_open = settings.max_open,
            max_idle = settings.max_idle,
            lifetime_secs = settings.max_lifetime.as_secs(),
            "Applied pool settings"
        );
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<u64, StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        if let Some(message) = self.next_failure() {
            return Err(StorageError::Statement(message));
        }
        self.inner.statements.lock().push(statement.to_string());
        Ok(self.apply_statement(statement))
    }
}

/// A checked-out connection; returned to the pool on drop
pub struct ConnectionLease {
    storage: InMemoryStorage,
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.storage.release();
    }
}

impl InMemoryStorage {
    /// Pool settings suitable for tests
    pub fn default_settings(max_open: u32) -> PoolSettings {
        PoolSettings {
            max_open,
            max_idle: max_open / 2,
            max_lifetime: Duration::from_secs(300),
            max_idle_time: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(max_open: u32) -> InMemoryStorage {
        InMemoryStorage::new(StorageEngine::Postgres, InMemoryStorage::default_settings(max_open))
    }

    #[tokio::test]
    async fn test_lease_accounting() {
        let storage = storage(4);
        let a = storage.acquire().await.unwrap();
        let b = storage.acquire().await.unwrap();

        let stats = storage.pool_stats().unwrap();
        assert_eq!(stats.in_use, 2);
        assert_eq!(stats.open, 2);
        assert_eq!(stats.max_open, 4);

        drop(a);
        let stats = storage.pool_stats().unwrap();
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.idle, 1);
        drop(b);
    }

    #[tokio::test]
    async fn test_exhausted_pool_counts_waits() {
        let storage = storage(1);
        let first = storage.acquire().await.unwrap();

        let waiter = {
            let storage = storage.clone();
            tokio::spawn(async move { storage.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(storage.pool_stats().unwrap().wait_count, 1);

        drop(first);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_handle_errors() {
        let storage = storage(2);
        storage.close();
        assert_eq!(storage.pool_stats(), Err(StorageError::Closed));
        assert_eq!(storage.execute("SELECT 1").await, Err(StorageError::Closed));
        assert!(storage.acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_maintenance_statements_update_tables() {
        let storage = storage(2);
        storage.insert_rows("users", 5);
        assert_eq!(storage.next_id("users"), 6);

        assert_eq!(storage.execute("DELETE FROM users").await.unwrap(), 5);
        assert_eq!(storage.row_count("users"), 0);

        storage
            .execute("ALTER SEQUENCE IF EXISTS users_id_seq RESTART WITH 1")
            .await
            .unwrap();
        assert_eq!(storage.next_id("users"), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let storage = storage(2);
        storage.inject_failures(1, "database is locked");

        let err = storage.execute("DELETE FROM users").await.unwrap_err();
        assert!(err.is_transient());
        assert!(storage.execute("DELETE FROM users").await.is_ok());
        assert_eq!(storage.executed_statements().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_interval() {
        let storage = storage(2);
        storage.set_failure_interval(3);

        let mut failures = 0;
        for _ in 0..9 {
            if storage.execute("SELECT 1").await.is_err() {
                failures += 1;
            }
        }
        assert_eq!(failures, 3);
    }

    #[test]
    fn test_apply_settings_shrinks_idle() {
        let storage = storage(10);
        let settings = PoolSettings {
            max_open: 3,
            max_idle: 1,
            ..InMemoryStorage::default_settings(3)
        };
        storage.apply_pool_settings(&settings).unwrap();
        assert_eq!(storage.settings().max_open, 3);
        assert_eq!(storage.pool_stats().unwrap().max_open, 3);
    }
}

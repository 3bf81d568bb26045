//! Retry with quadratic backoff for storage contention
//!
//! Wraps a storage operation and retries it while it fails with a
//! lock/deadlock-class error. Attempts are bounded, so the loop terminates
//! without external cancellation. After the last attempt the transient
//! error is surfaced as `GovernorError::RetriesExhausted`.

use super::StorageHandle;
use crate::error::{GovernorError, Result, StorageError};
use crate::observability::{GovernorMetrics, StructuredLogger};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Bounds for the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (default: 3)
    pub max_attempts: u32,
    /// Delay unit; the wait after attempt `n` is `base_delay * n^2`
    pub base_delay: Duration,
    /// Upper bound on any single wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait after a failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = attempt.saturating_mul(attempt).max(1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Executes storage operations with bounded retries
pub struct RetryExecutor {
    policy: RetryPolicy,
    retries: AtomicU64,
    exhausted: AtomicU64,
    metrics: Option<GovernorMetrics>,
    logger: Option<StructuredLogger>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            metrics: None,
            logger: None,
        }
    }

    pub fn with_metrics(mut self, metrics: GovernorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Retries performed so far
    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Operations that ran out of attempts
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Run `op`, retrying transient failures
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StorageError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(GovernorError::Storage(err));
            }

            if attempt >= max_attempts {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                if let Some(logger) = &self.logger {
                    logger.log_retries_exhausted(operation, attempt, &err.to_string());
                }
                return Err(GovernorError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: err,
                });
            }

            let delay = self.policy.delay_for(attempt);
            self.retries.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.inc_storage_retries();
            }
            if let Some(logger) = &self.logger {
                logger.log_retry(operation, attempt, delay, &err.to_string());
            }

            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Execute one raw statement through the retry loop
    pub async fn execute_statement(
        &self,
        storage: &dyn StorageHandle,
        statement: &str,
    ) -> Result<u64> {
        self.execute(statement, || storage.execute(statement)).await
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StorageEngine;
    use crate::storage::InMemoryStorage;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Instant;

    #[test]
    fn test_quadratic_delays() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for(3), Duration::from_millis(90));
        // Capped
        assert_eq!(policy.delay_for(4), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let executor = RetryExecutor::default();
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = executor
            .execute("insert budget", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(StorageError::Statement("Deadlock found when trying to get lock".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(executor.retry_count(), 2);
        // Slept base*1 then base*4 between the attempts
        assert!(start.elapsed() >= Duration::from_millis(50 + 200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let executor = RetryExecutor::default();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = executor
            .execute("delete users", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::Statement("database is locked".into())) }
            })
            .await;

        match result {
            Err(GovernorError::RetriesExhausted { attempts: n, .. }) => assert_eq!(n, 3),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(executor.exhausted_count(), 1);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let executor = RetryExecutor::default();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = executor
            .execute("select", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::Statement("syntax error".into())) }
            })
            .await;

        assert!(matches!(result, Err(GovernorError::Storage(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(executor.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_statement_against_storage() {
        let storage = InMemoryStorage::new(StorageEngine::Mysql, InMemoryStorage::default_settings(4));
        storage.inject_failures(2, "Lock wait timeout exceeded; try restarting transaction");
        storage.insert_rows("expenses", 3);

        let executor = RetryExecutor::default();
        let rows = executor
            .execute_statement(&storage, "DELETE FROM expenses")
            .await
            .unwrap();

        assert_eq!(rows, 3);
        assert_eq!(executor.retry_count(), 2);
    }
}

//! Adjustable admission gate for test executions
//!
//! Unlike a semaphore, the limit can shrink below the permits already
//! handed out. Admitted executions keep running; new ones wait until the
//! in-use count drops under the new limit.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    limit: AtomicUsize,
    in_use: Mutex<usize>,
    released: Notify,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: AtomicUsize::new(limit.max(1)),
            in_use: Mutex::new(0),
            released: Notify::new(),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock()
    }

    /// Change the limit; raising it wakes waiters
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit.max(1), Ordering::SeqCst);
        self.released.notify_waiters();
    }

    /// Take a permit if one is free
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConcurrencyPermit> {
        let mut in_use = self.in_use.lock();
        if *in_use < self.limit() {
            *in_use += 1;
            Some(ConcurrencyPermit {
                limiter: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Wait for a permit
    pub async fn acquire(self: &Arc<Self>) -> ConcurrencyPermit {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            released.await;
        }
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        drop(in_use);
        self.released.notify_waiters();
    }
}

/// Admission held for the lifetime of one execution
#[derive(Debug)]
pub struct ConcurrencyPermit {
    limiter: Arc<ConcurrencyLimiter>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_try_acquire_respects_limit() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());

        drop(a);
        assert_eq!(limiter.in_use(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_shrinking_keeps_admitted_permits() {
        let limiter = ConcurrencyLimiter::new(4);
        let permits: Vec<_> = (0..4).filter_map(|_| limiter.try_acquire()).collect();
        assert_eq!(permits.len(), 4);

        limiter.set_limit(2);
        assert_eq!(limiter.in_use(), 4);
        assert!(limiter.try_acquire().is_none());

        drop(permits);
        assert_eq!(limiter.in_use(), 0);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_raising_limit_wakes_waiter() {
        let limiter = ConcurrencyLimiter::new(1);
        let _held = limiter.acquire().await;

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let _permit = limiter.acquire().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        limiter.set_limit(2);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_zero_limit_is_raised_to_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.limit(), 1);
    }
}

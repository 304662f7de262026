//! Rate limiting for botsense.
//!
//! A sliding log limiter bounds the number of requests per identity key
//! within a fixed-duration window. Per-key state lives in a sharded
//! [`DashMap`](dashmap::DashMap), so mutation for a single key is serialized
//! while unrelated keys are not funnelled through one global lock. Stale keys
//! are evicted by a periodic cleanup thread.

pub mod sliding_window;

use std::sync::Arc;
use std::time::{Duration, Instant};

use botsense_common::{BotsenseError, RateLimitConfig};

pub use sliding_window::SlidingWindowLimiter;

/// Returned when a key has used up its window. Retryable: the request may
/// succeed after `retry_after`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit of {limit} requests exceeded for {key}")]
pub struct RateExceeded {
    pub key: String,
    pub limit: usize,
    pub retry_after: Duration,
}

impl RateExceeded {
    /// Retry hint in whole seconds, rounded up so clients never retry early.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

impl From<RateExceeded> for BotsenseError {
    fn from(err: RateExceeded) -> Self {
        let retry_after_secs = err.retry_after_secs();
        BotsenseError::RateLimited {
            key: err.key,
            retry_after_secs,
        }
    }
}

/// Shared handle to the sliding window limiter.
///
/// The limiter is cheaply cloneable (backed by `Arc`) and safe to share across
/// tasks and threads.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<SlidingWindowLimiter>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window` for each key.
    pub fn new(window: Duration, max_requests: usize) -> Self {
        tracing::info!(
            window_secs = window.as_secs(),
            max_requests,
            "creating sliding window rate limiter"
        );
        Self {
            inner: Arc::new(SlidingWindowLimiter::new(window, max_requests)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_secs(config.window_secs), config.max_requests)
    }

    /// Record a request for `key` at `now`, or fail with [`RateExceeded`]
    /// without recording it.
    pub fn check_and_record(&self, key: &str, now: Instant) -> Result<(), RateExceeded> {
        let result = self.inner.check_and_record(key, now);
        if let Err(ref err) = result {
            tracing::debug!(key, retry_after_ms = err.retry_after.as_millis() as u64, "rate limit exceeded");
        }
        result
    }

    /// [`check_and_record`](Self::check_and_record) at the current instant.
    pub fn check(&self, key: &str) -> Result<(), RateExceeded> {
        self.check_and_record(key, Instant::now())
    }

    pub fn tracked_keys(&self) -> usize {
        self.inner.tracked_keys()
    }

    /// Spawn a background thread that periodically evicts stale keys.
    ///
    /// The thread holds an `Arc` to the limiter, so the limiter stays alive
    /// as long as the thread is running.
    pub fn start_cleanup_task(&self, interval: Duration) {
        let inner = Arc::clone(&self.inner);

        std::thread::Builder::new()
            .name("rate-limit-cleanup".into())
            .spawn(move || loop {
                std::thread::sleep(interval);
                inner.cleanup(Instant::now());
                tracing::trace!("rate limiter cleanup tick completed");
            })
            .expect("failed to spawn rate-limit cleanup thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_state() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let limiter2 = limiter.clone();

        assert!(limiter.check("shared").is_ok());
        assert!(limiter2.check("shared").is_ok());

        // Both clones recorded into the same window.
        assert!(limiter.check("shared").is_err());
        assert!(limiter2.check("shared").is_err());
    }

    #[test]
    fn retry_after_rounds_up() {
        let err = RateExceeded {
            key: "k".into(),
            limit: 1,
            retry_after: Duration::from_millis(1_200),
        };
        assert_eq!(err.retry_after_secs(), 2);

        let exact = RateExceeded {
            retry_after: Duration::from_secs(3),
            ..err
        };
        assert_eq!(exact.retry_after_secs(), 3);
    }

    #[test]
    fn converts_into_common_error() {
        let err = RateExceeded {
            key: "10.0.0.1".into(),
            limit: 100,
            retry_after: Duration::from_secs(30),
        };
        match BotsenseError::from(err) {
            BotsenseError::RateLimited { key, retry_after_secs } => {
                assert_eq!(key, "10.0.0.1");
                assert_eq!(retry_after_secs, 30);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }
}

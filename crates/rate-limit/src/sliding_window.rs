use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::RateExceeded;

/// A concurrent sliding log rate limiter.
///
/// Every key owns the timestamps of the requests it was admitted for within
/// the last `window`, bounds included: a timestamp exactly `window` old still
/// counts and is pruned only once it is strictly older. Pruning happens lazily
/// on each check. All mutation for a key happens while holding that
/// key's shard lock, so concurrent checks on the same key are serialized and
/// can never both observe a stale count. Unrelated keys on other shards
/// proceed in parallel.
pub struct SlidingWindowLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    window: Duration,
    max_requests: usize,
}

impl SlidingWindowLimiter {
    /// Create a new sliding window limiter admitting at most `max_requests`
    /// per `window` for each key.
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Prune expired timestamps for `key`, then either record `now` or fail
    /// without recording.
    pub fn check_and_record(&self, key: &str, now: Instant) -> Result<(), RateExceeded> {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_requests.min(64)));

        let timestamps = entry.value_mut();

        while let Some(&oldest) = timestamps.front() {
            if self.expired(oldest, now) {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_requests {
            // The oldest admitted request is the first to leave the window.
            // Never zero: at exactly `window` old the timestamp is still counted.
            let retry_after = timestamps
                .front()
                .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(self.window)
                .max(Duration::from_nanos(1));

            return Err(RateExceeded {
                key: key.to_string(),
                limit: self.max_requests,
                retry_after,
            });
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Number of requests currently counted against `key`, as of `now`.
    pub fn current_count(&self, key: &str, now: Instant) -> usize {
        self.windows
            .get(key)
            .map(|timestamps| {
                timestamps
                    .iter()
                    .filter(|&&ts| !self.expired(ts, now))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Remove keys whose newest timestamp has left the window.
    pub fn cleanup(&self, now: Instant) {
        self.windows.retain(|_key, timestamps| {
            timestamps
                .back()
                .is_some_and(|&newest| !self.expired(newest, now))
        });

        tracing::debug!(
            remaining = self.windows.len(),
            "sliding window cleanup complete"
        );
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn expired(&self, ts: Instant, now: Instant) -> bool {
        now.saturating_duration_since(ts) > self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_exactly_max_within_window() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 100);
        let start = Instant::now();

        for i in 0..100 {
            let now = start + Duration::from_millis(i * 10);
            assert!(
                limiter.check_and_record("client", now).is_ok(),
                "request {} should be allowed",
                i
            );
        }

        let err = limiter
            .check_and_record("client", start + Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.limit, 100);
        assert_eq!(limiter.current_count("client", start + Duration::from_secs(1)), 100);
    }

    #[test]
    fn rejected_requests_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 2);
        let start = Instant::now();

        limiter.check_and_record("k", start).unwrap();
        limiter.check_and_record("k", start + Duration::from_secs(1)).unwrap();
        for s in 2..9 {
            assert!(limiter
                .check_and_record("k", start + Duration::from_secs(s))
                .is_err());
        }

        // Only the first admitted request has aged out just after t=10.
        assert!(limiter
            .check_and_record("k", start + Duration::from_millis(10_001))
            .is_ok());
        assert!(limiter
            .check_and_record("k", start + Duration::from_millis(10_500))
            .is_err());
    }

    #[test]
    fn succeeds_again_after_window_passes() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 100);
        let start = Instant::now();

        for _ in 0..100 {
            limiter.check_and_record("client", start).unwrap();
        }
        assert!(limiter.check_and_record("client", start).is_err());

        let later = start + Duration::from_secs(61);
        assert!(limiter.check_and_record("client", later).is_ok());
        assert_eq!(limiter.current_count("client", later), 1);
    }

    #[test]
    fn retry_after_points_at_oldest_expiry() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 2);
        let start = Instant::now();

        limiter.check_and_record("k", start).unwrap();
        limiter
            .check_and_record("k", start + Duration::from_secs(20))
            .unwrap();

        let err = limiter
            .check_and_record("k", start + Duration::from_secs(45))
            .unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(15));
    }

    #[test]
    fn timestamp_exactly_window_old_still_counts() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 1);
        let start = Instant::now();
        limiter.check_and_record("k", start).unwrap();

        let edge = start + Duration::from_secs(10);
        assert_eq!(limiter.current_count("k", edge), 1);
        let err = limiter.check_and_record("k", edge).unwrap_err();
        assert!(err.retry_after > Duration::ZERO);
        assert_eq!(err.retry_after_secs(), 1);

        let past = edge + Duration::from_nanos(1);
        assert_eq!(limiter.current_count("k", past), 0);
        assert!(limiter.check_and_record("k", past).is_ok());
    }

    #[test]
    fn independent_keys() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(1), 2);
        let now = Instant::now();

        assert!(limiter.check_and_record("a", now).is_ok());
        assert!(limiter.check_and_record("a", now).is_ok());
        assert!(limiter.check_and_record("a", now).is_err());

        // Key B is independent.
        assert!(limiter.check_and_record("b", now).is_ok());
    }

    #[test]
    fn cleanup_removes_stale_entries() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(1), 10);
        let start = Instant::now();
        limiter.check_and_record("will-be-stale", start).unwrap();
        limiter
            .check_and_record("keep-alive", start + Duration::from_secs(5))
            .unwrap();

        limiter.cleanup(start + Duration::from_millis(5_500));

        assert!(limiter.windows.contains_key("keep-alive"));
        assert!(!limiter.windows.contains_key("will-be-stale"));
    }
}

use botsense_common::SessionConfig;
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::collector::{EventCollector, RecordOutcome};
use crate::events::Event;
use crate::features::FeatureVector;

/// Derive the session identity key from the connection and session cookie.
///
/// Hex SHA-256 of `ip|cookie`, truncated to 32 characters.
pub fn identity_key(client_ip: &str, cookie: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_ip.as_bytes());
    hasher.update(b"|");
    hasher.update(cookie.unwrap_or("").as_bytes());
    let mut key = hex::encode(hasher.finalize());
    key.truncate(32);
    key
}

/// Fresh random session cookie value.
pub fn mint_session_cookie() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug)]
struct Session {
    collector: EventCollector,
    created_at: Instant,
    last_seen: Instant,
    js_verified: bool,
    features: Option<FeatureVector>,
}

impl Session {
    fn new(max_events: usize, now: Instant) -> Self {
        Self {
            collector: EventCollector::new(max_events),
            created_at: now,
            last_seen: now,
            js_verified: false,
            features: None,
        }
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) >= timeout
    }
}

/// Point-in-time copy of one session, taken for feature extraction.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub events: Vec<Event>,
    pub age: Duration,
    pub js_verified: bool,
    pub evicted_events: u64,
    pub rejected_events: u64,
    /// Features computed at the previous assessment, if any.
    pub last_features: Option<FeatureVector>,
}

/// Per-identity sessions on a sharded map.
///
/// Expiry is lazy: an expired session found on access is replaced by a
/// fresh one. [`SessionStore::sweep`] exists only to bound memory.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    inactivity_timeout: Duration,
    max_events: usize,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout_secs),
            max_events: config.max_events,
            max_sessions: config.max_sessions,
        }
    }

    /// Run `f` on the live session for `key`, creating or renewing it first.
    fn with_session<R>(&self, key: &str, now: Instant, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self
            .sessions
            .entry(key.to_owned())
            .or_insert_with(|| Session::new(self.max_events, now));
        if session.is_expired(now, self.inactivity_timeout) {
            trace!(key, "session expired, starting a new one");
            *session = Session::new(self.max_events, now);
        }
        session.last_seen = now;
        f(session.value_mut())
    }

    /// Create the session if needed and refresh its inactivity timer.
    pub fn touch(&self, key: &str, now: Instant) {
        self.with_session(key, now, |_| ());
    }

    /// Append events; returns the outcome and the resulting buffer length.
    pub fn record_events(
        &self,
        key: &str,
        events: Vec<Event>,
        now: Instant,
    ) -> (RecordOutcome, usize) {
        self.with_session(key, now, |s| {
            let outcome = s.collector.record_all(events);
            (outcome, s.collector.len())
        })
    }

    pub fn mark_js_executed(&self, key: &str, now: Instant) {
        self.with_session(key, now, |s| s.js_verified = true);
    }

    pub fn snapshot(&self, key: &str, now: Instant) -> SessionSnapshot {
        self.with_session(key, now, |s| SessionSnapshot {
            events: s.collector.snapshot(),
            age: now.saturating_duration_since(s.created_at),
            js_verified: s.js_verified,
            evicted_events: s.collector.total_evicted(),
            rejected_events: s.collector.total_rejected(),
            last_features: s.features.clone(),
        })
    }

    /// Remember the most recent feature vector for a session.
    pub fn store_features(&self, key: &str, features: FeatureVector) {
        if let Some(mut session) = self.sessions.get_mut(key) {
            session.features = Some(features);
        }
    }

    /// Destroy a session. Returns whether one existed.
    pub fn end(&self, key: &str) -> bool {
        self.sessions.remove(key).is_some()
    }

    /// Drop expired sessions, then evict least-recently-seen ones while the
    /// store is over `max_sessions`. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        let timeout = self.inactivity_timeout;
        self.sessions.retain(|_, s| !s.is_expired(now, timeout));

        let excess = self.sessions.len().saturating_sub(self.max_sessions);
        if excess > 0 {
            let mut by_age: Vec<(Instant, String)> = self
                .sessions
                .iter()
                .map(|entry| (entry.last_seen, entry.key().clone()))
                .collect();
            by_age.sort_unstable();
            for (_, key) in by_age.into_iter().take(excess) {
                self.sessions.remove(&key);
            }
        }

        let removed = before.saturating_sub(self.sessions.len());
        debug!(removed, remaining = self.sessions.len(), "session sweep");
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(timeout_secs: u64, max_sessions: usize) -> SessionStore {
        SessionStore::new(&SessionConfig {
            inactivity_timeout_secs: timeout_secs,
            max_events: 3,
            max_sessions,
            sweep_interval_secs: 60,
        })
    }

    #[test]
    fn identity_key_is_stable_and_truncated() {
        let a = identity_key("10.0.0.1", Some("abc"));
        assert_eq!(a.len(), 32);
        assert_eq!(a, identity_key("10.0.0.1", Some("abc")));
        assert_ne!(a, identity_key("10.0.0.1", Some("abd")));
        assert_ne!(a, identity_key("10.0.0.2", Some("abc")));
    }

    #[test]
    fn minted_cookies_differ() {
        let a = mint_session_cookie();
        assert_eq!(a.len(), 32);
        assert_ne!(a, mint_session_cookie());
    }

    #[test]
    fn buffer_is_capped_per_session() {
        let store = store(60, 10);
        let now = Instant::now();
        let events = (0..5).map(|i| Event::scroll(i as f64, i as f64)).collect();
        let (outcome, buffered) = store.record_events("k", events, now);
        assert_eq!(outcome.accepted, 5);
        assert_eq!(outcome.evicted, 2);
        assert_eq!(buffered, 3);
        assert_eq!(store.snapshot("k", now).evicted_events, 2);
    }

    #[test]
    fn expired_session_is_replaced_on_access() {
        let store = store(60, 10);
        let start = Instant::now();
        store.record_events("k", vec![Event::scroll(1.0, 0.0)], start);
        store.mark_js_executed("k", start);

        let snap = store.snapshot("k", start + Duration::from_secs(30));
        assert_eq!(snap.events.len(), 1);
        assert!(snap.js_verified);

        let snap = store.snapshot("k", start + Duration::from_secs(200));
        assert!(snap.events.is_empty());
        assert!(!snap.js_verified);
        assert_eq!(snap.age, Duration::ZERO);
    }

    #[test]
    fn end_destroys_session() {
        let store = store(60, 10);
        let now = Instant::now();
        store.snapshot("k", now);
        assert!(store.end("k"));
        assert!(!store.end("k"));
        assert!(store.is_empty());
    }

    #[test]
    fn features_are_kept_until_replaced() {
        let store = store(60, 10);
        let now = Instant::now();
        store.snapshot("k", now);
        let features = FeatureVector {
            event_count: 7,
            ..FeatureVector::default()
        };
        store.store_features("k", features.clone());
        assert_eq!(store.snapshot("k", now).last_features, Some(features));
    }

    #[test]
    fn sweep_removes_expired_then_oldest() {
        let store = store(60, 2);
        let start = Instant::now();
        store.snapshot("stale", start);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            store.snapshot(key, start + Duration::from_secs(100 + i as u64));
        }

        let removed = store.sweep(start + Duration::from_secs(110));
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 2);
        // "a" was the least recently seen of the live sessions.
        assert!(!store.end("a"));
        assert!(store.end("b"));
        assert!(store.end("c"));
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use botsense_bot_detect::{Action, BotDetector, Decision};
use botsense_common::AppConfig;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use serde::{Deserialize, Serialize};

/// Number of decisions retained for `/api/decisions`.
pub const DECISION_LOG_CAPACITY: usize = 1000;

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// Central application state holding configuration, metrics, the detection
/// engine and the recent decision log.
pub struct AppState {
    pub config: RwLock<AppConfig>,
    pub metrics: BotsenseMetrics,
    pub detector: Arc<BotDetector>,
    pub decision_log: RwLock<VecDeque<DecisionLogEntry>>,
    pub start_time: Instant,
}

/// Prometheus metrics collected by the engine and both HTTP surfaces.
pub struct BotsenseMetrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub decisions_total: IntCounterVec,
    pub rule_hits: IntCounterVec,
    pub rate_limited_total: IntCounter,
    pub events_collected_total: IntCounter,
    pub beacons_verified_total: IntCounter,
    pub reputation_lookups: IntCounterVec,
    pub evaluation_duration: Histogram,
}

/// One evaluated request, as kept in the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: String,
    pub timestamp: String,
    pub session_key: String,
    pub tier: String,
    pub score: f64,
    pub action: String,
    pub rules: Vec<String>,
}

impl BotsenseMetrics {
    /// Create all counters and histograms and register them against a fresh
    /// Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "botsense_requests_total",
            "Total number of public API requests received",
        ))
        .expect("failed to create requests_total counter");

        let decisions_total = IntCounterVec::new(
            Opts::new("botsense_decisions_total", "Decisions made, by action"),
            &["action"],
        )
        .expect("failed to create decisions_total counter");

        let rule_hits = IntCounterVec::new(
            Opts::new("botsense_rule_hits_total", "Number of times each risk rule fired"),
            &["rule"],
        )
        .expect("failed to create rule_hits counter");

        let rate_limited_total = IntCounter::with_opts(Opts::new(
            "botsense_rate_limited_total",
            "Total number of requests rejected by the rate limiter",
        ))
        .expect("failed to create rate_limited_total counter");

        let events_collected_total = IntCounter::with_opts(Opts::new(
            "botsense_events_collected_total",
            "Total number of client events accepted into session buffers",
        ))
        .expect("failed to create events_collected_total counter");

        let beacons_verified_total = IntCounter::with_opts(Opts::new(
            "botsense_beacons_verified_total",
            "Total number of valid JS execution beacons",
        ))
        .expect("failed to create beacons_verified_total counter");

        let reputation_lookups = IntCounterVec::new(
            Opts::new(
                "botsense_reputation_lookups_total",
                "IP reputation verdicts, by where the verdict came from",
            ),
            &["outcome"],
        )
        .expect("failed to create reputation_lookups counter");

        let evaluation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "botsense_evaluation_duration_seconds",
                "Time spent evaluating a request, including reputation lookup",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )
        .expect("failed to create evaluation_duration histogram");

        registry.register(Box::new(requests_total.clone())).expect("failed to register requests_total");
        registry.register(Box::new(decisions_total.clone())).expect("failed to register decisions_total");
        registry.register(Box::new(rule_hits.clone())).expect("failed to register rule_hits");
        registry.register(Box::new(rate_limited_total.clone())).expect("failed to register rate_limited_total");
        registry.register(Box::new(events_collected_total.clone())).expect("failed to register events_collected_total");
        registry.register(Box::new(beacons_verified_total.clone())).expect("failed to register beacons_verified_total");
        registry.register(Box::new(reputation_lookups.clone())).expect("failed to register reputation_lookups");
        registry.register(Box::new(evaluation_duration.clone())).expect("failed to register evaluation_duration");

        Self {
            registry,
            requests_total,
            decisions_total,
            rule_hits,
            rate_limited_total,
            events_collected_total,
            beacons_verified_total,
            reputation_lookups,
            evaluation_duration,
        }
    }

    pub fn decisions(&self, action: Action) -> u64 {
        self.decisions_total.with_label_values(&[action.as_str()]).get()
    }
}

impl Default for BotsenseMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new(config: AppConfig, detector: Arc<BotDetector>) -> Self {
        Self {
            config: RwLock::new(config),
            metrics: BotsenseMetrics::new(),
            detector,
            decision_log: RwLock::new(VecDeque::with_capacity(DECISION_LOG_CAPACITY)),
            start_time: Instant::now(),
        }
    }

    /// Count a decision in the metrics and append it to the decision log,
    /// dropping the oldest entry when full.
    pub fn record_decision(&self, session_key: &str, decision: &Decision) {
        self.metrics
            .decisions_total
            .with_label_values(&[decision.action.as_str()])
            .inc();
        for rule in decision.rules() {
            self.metrics.rule_hits.with_label_values(&[rule.as_str()]).inc();
        }

        let entry = DecisionLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            session_key: session_key.to_string(),
            tier: decision.tier.as_str().to_string(),
            score: decision.score,
            action: decision.action.as_str().to_string(),
            rules: decision.rules().iter().map(|r| r.as_str().to_string()).collect(),
        };

        let mut log = self.decision_log.write().expect("decision_log lock poisoned");
        if log.len() >= DECISION_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(entry);
    }
}

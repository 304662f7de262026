pub mod beacon;
pub mod collector;
pub mod events;
pub mod features;
pub mod policy;
pub mod score;
pub mod session;
pub mod user_agent;

use arc_swap::ArcSwap;
use botsense_common::{
    AppConfig, BotsenseError, BotsenseResult, JsBeaconConfig, PolicyConfig, SensitivityTier,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub use events::{Event, EventKind};
pub use features::{FeatureExtractor, FeatureVector};
pub use policy::{Action, Decision, DecisionPolicy, RecaptchaSignal};
pub use score::{RiskScore, RiskScorer, SideSignals};
pub use session::{identity_key, mint_session_cookie, SessionStore};
pub use user_agent::{classify_user_agent, UserAgentClass};

/// Result of appending a batch of client events to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub buffered: usize,
}

/// Per-request inputs that do not come from the session's event buffer.
#[derive(Debug, Clone, Copy)]
pub struct AssessmentRequest<'a> {
    pub tier: SensitivityTier,
    pub user_agent: Option<&'a str>,
    pub ip_malicious: bool,
    pub recaptcha: RecaptchaSignal,
    /// False when the client arrived without the session cookie that
    /// `/beacon.js` hands out, so it cannot have run the script.
    pub session_cookie_present: bool,
}

/// Everything the engine concluded about one request.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub features: FeatureVector,
    pub signals: AssessedSignals,
    pub decision: Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssessedSignals {
    pub ip_malicious: bool,
    pub user_agent: UserAgentClass,
    pub js_executed: Option<bool>,
}

/// Bot detection engine wrapping all sub-modules.
///
/// Sessions feed the feature extractor, whose output is scored together with
/// the request's side signals and mapped to an action by the decision policy.
/// The policy can be replaced at runtime.
pub struct BotDetector {
    sessions: SessionStore,
    extractor: FeatureExtractor,
    scorer: RiskScorer,
    policy: ArcSwap<DecisionPolicy>,
    beacon: JsBeaconConfig,
}

impl BotDetector {
    pub fn new(config: &AppConfig) -> Self {
        info!(
            max_events = config.sessions.max_events,
            disabled_rules = config.scoring.disabled_rules.len(),
            "bot detector initialized"
        );
        Self {
            sessions: SessionStore::new(&config.sessions),
            extractor: FeatureExtractor::new(config.features.clone()),
            scorer: RiskScorer::new(config.scoring.clone()),
            policy: ArcSwap::from_pointee(DecisionPolicy::new(config.policy.clone())),
            beacon: config.js_beacon.clone(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn policy(&self) -> Arc<DecisionPolicy> {
        self.policy.load_full()
    }

    /// Validate and install a new decision policy.
    pub fn set_policy(&self, config: PolicyConfig) -> BotsenseResult<()> {
        config
            .validate()
            .map_err(|e| BotsenseError::Config(e.to_string()))?;
        info!(
            high = config.tiers.high,
            low = config.tiers.low,
            challenge_band = config.challenge_band,
            "decision policy replaced"
        );
        self.policy.store(Arc::new(DecisionPolicy::new(config)));
        Ok(())
    }

    /// Register activity for a session, starting it on first sight.
    pub fn observe(&self, session_key: &str, now: Instant) {
        self.sessions.touch(session_key, now);
    }

    pub fn collect(&self, session_key: &str, events: Vec<Event>, now: Instant) -> CollectOutcome {
        let (outcome, buffered) = self.sessions.record_events(session_key, events, now);
        if outcome.rejected > 0 {
            debug!(
                session = session_key,
                rejected = outcome.rejected,
                "rejected malformed or out-of-order events"
            );
        }
        CollectOutcome {
            accepted: outcome.accepted,
            rejected: outcome.rejected,
            buffered,
        }
    }

    /// Beacon script for a session, with a freshly signed token.
    pub fn beacon_script(&self, session_key: &str, now_secs: u64) -> String {
        let token = beacon::issue_token(session_key, &self.beacon.secret, now_secs);
        beacon::beacon_script(&token)
    }

    /// Verify a posted beacon token and mark the session JS-capable.
    pub fn verify_beacon(
        &self,
        session_key: &str,
        token: &str,
        now: Instant,
        now_secs: u64,
    ) -> BotsenseResult<()> {
        if !beacon::verify_token(
            token,
            session_key,
            &self.beacon.secret,
            self.beacon.token_ttl_secs,
            now_secs,
        ) {
            debug!(session = session_key, "invalid beacon token");
            return Err(BotsenseError::InvalidBeacon);
        }
        self.sessions.mark_js_executed(session_key, now);
        Ok(())
    }

    pub fn classify_user_agent(&self, user_agent: Option<&str>) -> UserAgentClass {
        classify_user_agent(user_agent, &self.scorer.config().known_bots_allowlist)
    }

    /// Extract features, score them with the side signals and decide.
    pub fn assess(
        &self,
        session_key: &str,
        request: AssessmentRequest<'_>,
        now: Instant,
    ) -> Assessment {
        let snapshot = self.sessions.snapshot(session_key, now);
        let features = self.extractor.extract(&snapshot.events);
        self.sessions.store_features(session_key, features.clone());

        let grace = Duration::from_secs(self.beacon.grace_secs);
        let js_executed = if snapshot.js_verified {
            Some(true)
        } else if !request.session_cookie_present {
            Some(false)
        } else if snapshot.age < grace {
            None
        } else {
            Some(false)
        };

        let signals = SideSignals {
            ip_malicious: request.ip_malicious,
            user_agent: self.classify_user_agent(request.user_agent),
            js_executed,
        };
        let risk = self.scorer.score(&features, &signals);
        let decision = self.policy.load().decide(risk, request.tier, request.recaptcha);

        debug!(
            session = session_key,
            tier = request.tier.as_str(),
            score = decision.score,
            action = decision.action.as_str(),
            rules = ?decision.rules(),
            "assessed session"
        );

        Assessment {
            features,
            signals: AssessedSignals {
                ip_malicious: signals.ip_malicious,
                user_agent: signals.user_agent,
                js_executed,
            },
            decision,
        }
    }

    pub fn end_session(&self, session_key: &str) -> bool {
        self.sessions.end(session_key)
    }

    /// Bound session memory. Returns the number of sessions removed.
    pub fn sweep_sessions(&self, now: Instant) -> usize {
        self.sessions.sweep(now)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

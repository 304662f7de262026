use botsense_common::{RuleId, ScoringConfig};
use serde::Serialize;

use crate::features::FeatureVector;
use crate::user_agent::UserAgentClass;

/// Server-side signals scored alongside the behavioral features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideSignals {
    pub ip_malicious: bool,
    pub user_agent: UserAgentClass,
    /// `None` while the session is still inside the beacon grace period.
    pub js_executed: Option<bool>,
}

impl Default for SideSignals {
    fn default() -> Self {
        Self {
            ip_malicious: false,
            user_agent: UserAgentClass::Normal,
            js_executed: Some(true),
        }
    }
}

/// Aggregate suspicion in `[0, 1]` and the rules that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskScore {
    pub value: f64,
    pub triggered: Vec<RuleId>,
}

/// Weighted-sum rule evaluation.
///
/// Every rule looks at exactly one signal and never at another rule's
/// outcome. Unknown features do not trigger anything. With non-negative
/// weights the score can only grow as more rules fire.
#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: ScoringConfig,
}

impl RiskScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, features: &FeatureVector, signals: &SideSignals) -> RiskScore {
        let triggered: Vec<RuleId> = RuleId::ALL
            .into_iter()
            .filter(|&rule| self.config.is_enabled(rule) && self.fires(rule, features, signals))
            .collect();

        let total: f64 = triggered
            .iter()
            .map(|&rule| self.config.weights.weight(rule))
            .sum();

        RiskScore {
            value: total.clamp(0.0, 1.0),
            triggered,
        }
    }

    fn fires(&self, rule: RuleId, features: &FeatureVector, signals: &SideSignals) -> bool {
        let t = &self.config.thresholds;
        match rule {
            RuleId::DurationUnder1s => features
                .interaction_duration_ms
                .is_some_and(|d| d < t.min_duration_ms),
            RuleId::LowPointerVariability => features
                .pointer_angle_stddev
                .is_some_and(|s| s < t.min_pointer_angle_stddev),
            RuleId::ConstantScrollSpeed => features
                .scroll_speed_max_delta
                .is_some_and(|d| d <= t.scroll_speed_tolerance),
            RuleId::FastOrUniformTyping => {
                let fast = features
                    .keystroke_interval_mean_ms
                    .is_some_and(|m| m < t.min_typing_mean_ms);
                let uniform = features
                    .keystroke_interval_stddev_ms
                    .is_some_and(|s| s < t.min_typing_stddev_ms);
                fast || uniform
            }
            RuleId::MaliciousIp => signals.ip_malicious,
            RuleId::BotUserAgent => signals.user_agent == UserAgentClass::KnownBot,
            RuleId::MissingUserAgent => signals.user_agent == UserAgentClass::Missing,
            RuleId::JsNotExecuted => signals.js_executed == Some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn human_features() -> FeatureVector {
        FeatureVector {
            event_count: 40,
            pointer_events: 20,
            scroll_events: 10,
            keystroke_events: 10,
            interaction_duration_ms: Some(12_000.0),
            pointer_angle_mean: Some(0.4),
            pointer_angle_stddev: Some(0.9),
            scroll_speed_mean: Some(1.2),
            scroll_speed_max_delta: Some(0.6),
            keystroke_interval_mean_ms: Some(180.0),
            keystroke_interval_stddev_ms: Some(70.0),
        }
    }

    fn scorer() -> RiskScorer {
        RiskScorer::new(ScoringConfig::default())
    }

    #[test]
    fn human_session_scores_zero() {
        let score = scorer().score(&human_features(), &SideSignals::default());
        assert_eq!(score.value, 0.0);
        assert!(score.triggered.is_empty());
    }

    #[test]
    fn unknown_features_do_not_contribute() {
        let score = scorer().score(&FeatureVector::default(), &SideSignals::default());
        assert_eq!(score.value, 0.0);

        let pending_js = SideSignals {
            js_executed: None,
            ..SideSignals::default()
        };
        assert!(scorer().score(&FeatureVector::default(), &pending_js).triggered.is_empty());
    }

    #[test]
    fn weights_add_up() {
        let features = FeatureVector {
            interaction_duration_ms: Some(400.0),
            pointer_angle_stddev: Some(0.0),
            ..human_features()
        };
        let score = scorer().score(&features, &SideSignals::default());
        assert_eq!(
            score.triggered,
            vec![RuleId::DurationUnder1s, RuleId::LowPointerVariability]
        );
        assert!((score.value - 0.55).abs() < 1e-12);
    }

    #[test]
    fn typing_rule_fires_on_either_condition() {
        let fast = FeatureVector {
            keystroke_interval_mean_ms: Some(60.0),
            ..human_features()
        };
        let uniform = FeatureVector {
            keystroke_interval_stddev_ms: Some(5.0),
            ..human_features()
        };
        for features in [fast, uniform] {
            let score = scorer().score(&features, &SideSignals::default());
            assert_eq!(score.triggered, vec![RuleId::FastOrUniformTyping]);
            assert!((score.value - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn side_signals_and_clamping() {
        let signals = SideSignals {
            ip_malicious: true,
            user_agent: UserAgentClass::KnownBot,
            js_executed: Some(false),
        };
        let features = FeatureVector {
            interaction_duration_ms: Some(10.0),
            ..human_features()
        };
        let score = scorer().score(&features, &signals);
        assert_eq!(score.value, 1.0);
        assert_eq!(
            score.triggered,
            vec![
                RuleId::DurationUnder1s,
                RuleId::MaliciousIp,
                RuleId::BotUserAgent,
                RuleId::JsNotExecuted
            ]
        );
    }

    #[test]
    fn missing_user_agent_is_a_signal() {
        let signals = SideSignals {
            user_agent: UserAgentClass::Missing,
            ..SideSignals::default()
        };
        let score = scorer().score(&human_features(), &signals);
        assert_eq!(score.triggered, vec![RuleId::MissingUserAgent]);
    }

    #[test]
    fn enabling_a_rule_never_lowers_the_score() {
        let features = FeatureVector {
            interaction_duration_ms: Some(200.0),
            scroll_speed_max_delta: Some(0.0),
            keystroke_interval_mean_ms: Some(50.0),
            ..human_features()
        };
        let signals = SideSignals {
            ip_malicious: true,
            user_agent: UserAgentClass::Missing,
            js_executed: Some(false),
        };

        for rule in RuleId::ALL {
            let without = RiskScorer::new(ScoringConfig {
                disabled_rules: vec![rule],
                ..ScoringConfig::default()
            })
            .score(&features, &signals);
            let with = scorer().score(&features, &signals);
            assert!(with.value >= without.value, "enabling {} lowered the score", rule);
        }
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let config = ScoringConfig {
            disabled_rules: vec![RuleId::MaliciousIp],
            ..ScoringConfig::default()
        };
        let signals = SideSignals {
            ip_malicious: true,
            ..SideSignals::default()
        };
        let score = RiskScorer::new(config).score(&human_features(), &signals);
        assert_eq!(score.value, 0.0);
    }
}

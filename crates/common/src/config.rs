use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level botsense configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub ip_reputation: IpReputationConfig,
    #[serde(default)]
    pub js_beacon: JsBeaconConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Take the client address from the first `X-Forwarded-For` entry.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            trust_forwarded_for: false,
            session_cookie: default_session_cookie(),
            admin: AdminConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen: default_admin_listen(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// Ring-buffer capacity per session; older events are evicted.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout(),
            max_events: default_max_events(),
            max_sessions: default_max_sessions(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Minimum per-signal event counts below which a feature is reported as unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_min_timing_events")]
    pub min_timing_events: usize,
    #[serde(default = "default_min_pointer_events")]
    pub min_pointer_events: usize,
    #[serde(default = "default_min_scroll_events")]
    pub min_scroll_events: usize,
    #[serde(default = "default_min_keystroke_events")]
    pub min_keystroke_events: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_timing_events: default_min_timing_events(),
            min_pointer_events: default_min_pointer_events(),
            min_scroll_events: default_min_scroll_events(),
            min_keystroke_events: default_min_keystroke_events(),
        }
    }
}

/// Identifier of a single scoring rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    #[serde(rename = "duration_under_1s")]
    DurationUnder1s,
    LowPointerVariability,
    ConstantScrollSpeed,
    FastOrUniformTyping,
    MaliciousIp,
    BotUserAgent,
    MissingUserAgent,
    JsNotExecuted,
}

impl RuleId {
    pub const ALL: [RuleId; 8] = [
        RuleId::DurationUnder1s,
        RuleId::LowPointerVariability,
        RuleId::ConstantScrollSpeed,
        RuleId::FastOrUniformTyping,
        RuleId::MaliciousIp,
        RuleId::BotUserAgent,
        RuleId::MissingUserAgent,
        RuleId::JsNotExecuted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuleId::DurationUnder1s => "duration_under_1s",
            RuleId::LowPointerVariability => "low_pointer_variability",
            RuleId::ConstantScrollSpeed => "constant_scroll_speed",
            RuleId::FastOrUniformTyping => "fast_or_uniform_typing",
            RuleId::MaliciousIp => "malicious_ip",
            RuleId::BotUserAgent => "bot_user_agent",
            RuleId::MissingUserAgent => "missing_user_agent",
            RuleId::JsNotExecuted => "js_not_executed",
        }
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: RuleWeights,
    #[serde(default)]
    pub thresholds: RuleThresholds,
    #[serde(default)]
    pub disabled_rules: Vec<RuleId>,
    /// User-Agent substrings that are always classified as a normal client.
    #[serde(default)]
    pub known_bots_allowlist: Vec<String>,
}

impl ScoringConfig {
    pub fn is_enabled(&self, rule: RuleId) -> bool {
        !self.disabled_rules.contains(&rule)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleWeights {
    #[serde(default = "default_w_duration")]
    pub duration_under_1s: f64,
    #[serde(default = "default_w_pointer")]
    pub low_pointer_variability: f64,
    #[serde(default = "default_w_scroll")]
    pub constant_scroll_speed: f64,
    #[serde(default = "default_w_typing")]
    pub fast_or_uniform_typing: f64,
    #[serde(default = "default_w_malicious_ip")]
    pub malicious_ip: f64,
    #[serde(default = "default_w_bot_ua")]
    pub bot_user_agent: f64,
    #[serde(default = "default_w_missing_ua")]
    pub missing_user_agent: f64,
    #[serde(default = "default_w_js")]
    pub js_not_executed: f64,
}

impl RuleWeights {
    pub fn weight(&self, rule: RuleId) -> f64 {
        match rule {
            RuleId::DurationUnder1s => self.duration_under_1s,
            RuleId::LowPointerVariability => self.low_pointer_variability,
            RuleId::ConstantScrollSpeed => self.constant_scroll_speed,
            RuleId::FastOrUniformTyping => self.fast_or_uniform_typing,
            RuleId::MaliciousIp => self.malicious_ip,
            RuleId::BotUserAgent => self.bot_user_agent,
            RuleId::MissingUserAgent => self.missing_user_agent,
            RuleId::JsNotExecuted => self.js_not_executed,
        }
    }
}

impl Default for RuleWeights {
    fn default() -> Self {
        Self {
            duration_under_1s: default_w_duration(),
            low_pointer_variability: default_w_pointer(),
            constant_scroll_speed: default_w_scroll(),
            fast_or_uniform_typing: default_w_typing(),
            malicious_ip: default_w_malicious_ip(),
            bot_user_agent: default_w_bot_ua(),
            missing_user_agent: default_w_missing_ua(),
            js_not_executed: default_w_js(),
        }
    }
}

/// Trigger conditions for the behavioral rules. These are illustrative
/// defaults, not calibrated constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleThresholds {
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: f64,
    #[serde(default = "default_min_pointer_angle_stddev")]
    pub min_pointer_angle_stddev: f64,
    /// Largest relative change between consecutive scroll speeds that still
    /// counts as "constant".
    #[serde(default = "default_scroll_speed_tolerance")]
    pub scroll_speed_tolerance: f64,
    #[serde(default = "default_min_typing_mean_ms")]
    pub min_typing_mean_ms: f64,
    #[serde(default = "default_min_typing_stddev_ms")]
    pub min_typing_stddev_ms: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            min_duration_ms: default_min_duration_ms(),
            min_pointer_angle_stddev: default_min_pointer_angle_stddev(),
            scroll_speed_tolerance: default_scroll_speed_tolerance(),
            min_typing_mean_ms: default_min_typing_mean_ms(),
            min_typing_stddev_ms: default_min_typing_stddev_ms(),
        }
    }
}

/// Page sensitivity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityTier {
    High,
    Low,
}

impl SensitivityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SensitivityTier::High => "high",
            SensitivityTier::Low => "low",
        }
    }
}

/// What to assume when an external collaborator fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Treat the missing signal as benign.
    Open,
    /// Treat the missing signal as maximal risk.
    Closed,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Open
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub tiers: TierThresholds,
    /// Width of the challenge band above a tier threshold.
    #[serde(default = "default_challenge_band")]
    pub challenge_band: f64,
    #[serde(default)]
    pub recaptcha: RecaptchaConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            tiers: TierThresholds::default(),
            challenge_band: default_challenge_band(),
            recaptcha: RecaptchaConfig::default(),
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [("high", self.tiers.high), ("low", self.tiers.low)] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("policy.tiers.{} must be within [0, 1], got {}", name, value);
            }
        }
        if !self.challenge_band.is_finite() || self.challenge_band < 0.0 {
            anyhow::bail!("policy.challenge_band must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.recaptcha.weight) {
            anyhow::bail!(
                "policy.recaptcha.weight must be within [0, 1], got {}",
                self.recaptcha.weight
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierThresholds {
    #[serde(default = "default_high_threshold")]
    pub high: f64,
    #[serde(default = "default_low_threshold")]
    pub low: f64,
}

impl TierThresholds {
    pub fn threshold(&self, tier: SensitivityTier) -> f64 {
        match tier {
            SensitivityTier::High => self.high,
            SensitivityTier::Low => self.low,
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: default_high_threshold(),
            low: default_low_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecaptchaConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Share of the final decision score taken by the reCAPTCHA opinion.
    #[serde(default = "default_recaptcha_weight")]
    pub weight: f64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for RecaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            weight: default_recaptcha_weight(),
            failure_policy: FailurePolicy::Open,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpReputationConfig {
    #[serde(default)]
    pub blocklist: Option<PathBuf>,
    #[serde(default)]
    pub allowlist: Option<PathBuf>,
    #[serde(default)]
    pub remote: Option<RemoteReputationConfig>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteReputationConfig {
    /// Base URL; the address is appended as the last path segment.
    pub endpoint: String,
    #[serde(default = "default_remote_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_remote_cache_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsBeaconConfig {
    #[serde(default = "default_beacon_secret")]
    pub secret: String,
    #[serde(default = "default_beacon_ttl")]
    pub token_ttl_secs: u64,
    /// How long a session may go without a beacon before that absence counts.
    #[serde(default = "default_beacon_grace")]
    pub grace_secs: u64,
}

impl Default for JsBeaconConfig {
    fn default() -> Self {
        Self {
            secret: default_beacon_secret(),
            token_ttl_secs: default_beacon_ttl(),
            grace_secs: default_beacon_grace(),
        }
    }
}

// Default value helpers
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_session_cookie() -> String {
    "__bs_sid".to_string()
}
fn default_true() -> bool {
    true
}
fn default_inactivity_timeout() -> u64 {
    1800
}
fn default_max_events() -> usize {
    500
}
fn default_max_sessions() -> usize {
    100_000
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_min_timing_events() -> usize {
    2
}
fn default_min_pointer_events() -> usize {
    2
}
fn default_min_scroll_events() -> usize {
    3
}
fn default_min_keystroke_events() -> usize {
    2
}
fn default_w_duration() -> f64 {
    0.3
}
fn default_w_pointer() -> f64 {
    0.25
}
fn default_w_scroll() -> f64 {
    0.15
}
fn default_w_typing() -> f64 {
    0.2
}
fn default_w_malicious_ip() -> f64 {
    0.4
}
fn default_w_bot_ua() -> f64 {
    0.3
}
fn default_w_missing_ua() -> f64 {
    0.2
}
fn default_w_js() -> f64 {
    0.3
}
fn default_min_duration_ms() -> f64 {
    1000.0
}
fn default_min_pointer_angle_stddev() -> f64 {
    0.1
}
fn default_scroll_speed_tolerance() -> f64 {
    0.01
}
fn default_min_typing_mean_ms() -> f64 {
    100.0
}
fn default_min_typing_stddev_ms() -> f64 {
    30.0
}
fn default_challenge_band() -> f64 {
    0.2
}
fn default_high_threshold() -> f64 {
    0.7
}
fn default_low_threshold() -> f64 {
    0.3
}
fn default_recaptcha_weight() -> f64 {
    0.5
}
fn default_window_secs() -> u64 {
    60
}
fn default_max_requests() -> usize {
    100
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_remote_timeout() -> u64 {
    300
}
fn default_remote_cache_ttl() -> u64 {
    300
}
fn default_beacon_ttl() -> u64 {
    600
}
fn default_beacon_grace() -> u64 {
    10
}
/// 32 random bytes, hex encoded. Tokens signed with it die with the process.
fn default_beacon_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        tracing::debug!(
            path,
            disabled_rules = config.scoring.disabled_rules.len(),
            remote_reputation = config.ip_reputation.remote.is_some(),
            "configuration validated"
        );
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping.
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sessions.max_events == 0 {
            anyhow::bail!("sessions.max_events must be greater than zero");
        }

        for rule in RuleId::ALL {
            let weight = self.scoring.weights.weight(rule);
            if !weight.is_finite() || weight < 0.0 {
                anyhow::bail!("scoring.weights.{} must be a non-negative number", rule);
            }
        }

        let t = &self.scoring.thresholds;
        for (name, value) in [
            ("min_duration_ms", t.min_duration_ms),
            ("min_pointer_angle_stddev", t.min_pointer_angle_stddev),
            ("scroll_speed_tolerance", t.scroll_speed_tolerance),
            ("min_typing_mean_ms", t.min_typing_mean_ms),
            ("min_typing_stddev_ms", t.min_typing_stddev_ms),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("scoring.thresholds.{} must be a non-negative number", name);
            }
        }

        self.policy.validate()?;

        if self.rate_limit.enabled {
            if self.rate_limit.window_secs == 0 {
                anyhow::bail!("rate_limit.window_secs must be greater than zero");
            }
            if self.rate_limit.max_requests == 0 {
                anyhow::bail!("rate_limit.max_requests must be greater than zero");
            }
        }

        if let Some(remote) = &self.ip_reputation.remote {
            if remote.endpoint.trim().is_empty() {
                anyhow::bail!("ip_reputation.remote.endpoint must not be empty");
            }
            if remote.timeout_ms == 0 {
                anyhow::bail!("ip_reputation.remote.timeout_ms must be greater than zero");
            }
        }

        if self.js_beacon.secret.is_empty() {
            anyhow::bail!("js_beacon.secret must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_beacon_secrets_are_random() {
        let a = JsBeaconConfig::default().secret;
        let b = JsBeaconConfig::default().secret;
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        // Not a clock reading: a nanosecond timestamp fits in 16 hex digits.
        let now_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        assert_ne!(a, format!("{:x}", now_nanos));
        assert!(u128::from_str_radix(&a, 16).is_err());
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = AppConfig::from_yaml(include_str!("../../../config/botsense.yaml")).unwrap();
        assert_eq!(config.server.session_cookie, "__bs_sid");
        assert_eq!(config.scoring.known_bots_allowlist.len(), 2);
        assert!(config.ip_reputation.remote.is_none());
        assert!(!config.js_beacon.secret.is_empty());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("").unwrap();
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.policy.tiers.high, 0.7);
        assert_eq!(config.policy.tiers.low, 0.3);
        assert_eq!(config.scoring.weights.malicious_ip, 0.4);
        assert_eq!(config.ip_reputation.failure_policy, FailurePolicy::Open);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let yaml = r#"
scoring:
  weights:
    duration_under_1s: 0.5
  disabled_rules: [js_not_executed]
policy:
  tiers:
    low: 0.4
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.scoring.weights.duration_under_1s, 0.5);
        assert_eq!(config.scoring.weights.bot_user_agent, 0.3);
        assert!(!config.scoring.is_enabled(RuleId::JsNotExecuted));
        assert!(config.scoring.is_enabled(RuleId::MaliciousIp));
        assert_eq!(config.policy.tiers.low, 0.4);
        assert_eq!(config.policy.tiers.high, 0.7);
    }

    #[test]
    fn rejects_negative_weight() {
        let yaml = "scoring:\n  weights:\n    malicious_ip: -0.1\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let yaml = "policy:\n  tiers:\n    high: 1.5\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn rejects_zero_rate_window() {
        let yaml = "rate_limit:\n  window_secs: 0\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn failure_policy_parses_lowercase() {
        let yaml = r#"
ip_reputation:
  failure_policy: closed
  remote:
    endpoint: "http://reputation.internal/v1/ip"
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.ip_reputation.failure_policy, FailurePolicy::Closed);
        let remote = config.ip_reputation.remote.unwrap();
        assert_eq!(remote.timeout_ms, 300);
        assert_eq!(remote.cache_ttl_secs, 300);
    }

    #[test]
    fn rule_ids_round_trip_through_names() {
        for rule in RuleId::ALL {
            let json = serde_json::to_string(&rule).unwrap();
            assert_eq!(json, format!("\"{}\"", rule.as_str()));
        }
    }
}

use botsense_common::{FailurePolicy, PolicyConfig, RuleId, SensitivityTier};
use serde::Serialize;

use crate::score::RiskScore;

/// What the caller should do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    /// Trigger secondary verification.
    Challenge,
    Block,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Challenge => "challenge",
            Action::Block => "block",
        }
    }
}

/// The reCAPTCHA v3 opinion for this request, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecaptchaSignal {
    /// No verification was performed.
    Absent,
    /// Score in `[0, 1]`, where 1 is very likely human.
    Score(f64),
    /// The verification call failed or timed out.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: Action,
    /// Score the action was derived from (risk blended with reCAPTCHA).
    pub score: f64,
    pub risk: RiskScore,
    pub tier: SensitivityTier,
    pub threshold: f64,
}

impl Decision {
    pub fn rules(&self) -> &[RuleId] {
        &self.risk.triggered
    }
}

/// Maps a score and page tier to an [`Action`].
///
/// Below the tier threshold: allow. From the threshold up to
/// `threshold + challenge_band`: challenge. At or above that: block.
#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy {
    config: PolicyConfig,
}

impl DecisionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// `(threshold, block_at)` for a tier.
    pub fn bounds(&self, tier: SensitivityTier) -> (f64, f64) {
        let threshold = self.config.tiers.threshold(tier);
        (threshold, threshold + self.config.challenge_band)
    }

    pub fn action_for(&self, score: f64, tier: SensitivityTier) -> Action {
        let (threshold, block_at) = self.bounds(tier);
        if score < threshold {
            Action::Allow
        } else if score < block_at {
            Action::Challenge
        } else {
            Action::Block
        }
    }

    /// Blend the internal risk with the reCAPTCHA opinion.
    ///
    /// reCAPTCHA reports humanness, so its risk is `1 - score`. A failed or
    /// out-of-range opinion is resolved by the configured failure policy.
    pub fn blended_score(&self, risk: f64, recaptcha: RecaptchaSignal) -> f64 {
        let rc = &self.config.recaptcha;
        if !rc.enabled {
            return risk;
        }

        let recaptcha_risk = match recaptcha {
            RecaptchaSignal::Absent => return risk,
            RecaptchaSignal::Score(s) if (0.0..=1.0).contains(&s) => 1.0 - s,
            RecaptchaSignal::Score(_) | RecaptchaSignal::Failed => match rc.failure_policy {
                FailurePolicy::Open => return risk,
                FailurePolicy::Closed => 1.0,
            },
        };

        ((1.0 - rc.weight) * risk + rc.weight * recaptcha_risk).clamp(0.0, 1.0)
    }

    pub fn decide(
        &self,
        risk: RiskScore,
        tier: SensitivityTier,
        recaptcha: RecaptchaSignal,
    ) -> Decision {
        let score = self.blended_score(risk.value, recaptcha);
        let (threshold, _) = self.bounds(tier);
        Decision {
            action: self.action_for(score, tier),
            score,
            risk,
            tier,
            threshold,
        }
    }
}

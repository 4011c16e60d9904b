//! Rule-based fraud scoring
//!
//! Combines weighted sub-scores over the extracted feature vector into a
//! fraud score in [0, 1], blends in any pre-existing score carried by the
//! record, and maps the result to a decision and risk level. A blacklisted
//! merchant overrides everything to DECLINE/CRITICAL.

use riskflow_core::{Decision, FeatureVector, RiskLevel, Transaction};

/// Sub-score weights
const WEIGHT_AMOUNT: f64 = 0.20;
const WEIGHT_TEMPORAL: f64 = 0.10;
const WEIGHT_USER: f64 = 0.25;
const WEIGHT_MERCHANT: f64 = 0.20;
const WEIGHT_VELOCITY: f64 = 0.15;
const WEIGHT_DEVICE: f64 = 0.10;

/// Blend factors when the input carried a score already
const PRIOR_WEIGHT: f64 = 0.6;
const FEATURE_WEIGHT: f64 = 0.4;

/// Feature-driven scorer producing the final decision
#[derive(Debug, Clone, Default)]
pub struct RuleScorer;

impl RuleScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score the feature vector alone, before prior blending
    pub fn feature_score(&self, features: &FeatureVector) -> f64 {
        let score = amount_score(features) * WEIGHT_AMOUNT
            + temporal_score(features) * WEIGHT_TEMPORAL
            + user_behavior_score(features) * WEIGHT_USER
            + merchant_risk_score(features) * WEIGHT_MERCHANT
            + velocity_score(features) * WEIGHT_VELOCITY
            + device_network_score(features) * WEIGHT_DEVICE;

        score.clamp(0.0, 1.0)
    }

    /// Score the transaction in place: fraud_score, risk_level and decision
    pub fn apply(&self, tx: &mut Transaction) {
        let feature_based = self.feature_score(&tx.features);

        let combined = match tx.fraud_score {
            Some(prior) => PRIOR_WEIGHT * prior + FEATURE_WEIGHT * feature_based,
            None => feature_based,
        };
        let score = combined.clamp(0.0, 1.0);

        let (decision, risk_level) = decide(score);
        tx.fraud_score = Some(score);
        tx.decision = Some(decision);
        tx.risk_level = Some(risk_level);

        // Hard override, applied last
        if tx.features.flag("is_blacklisted_merchant") {
            tx.decision = Some(Decision::Decline);
            tx.risk_level = Some(RiskLevel::Critical);
        }
    }
}

/// Map a clamped score to its decision and risk level
pub fn decide(score: f64) -> (Decision, RiskLevel) {
    if score >= 0.95 {
        (Decision::Decline, RiskLevel::Critical)
    } else if score >= 0.80 {
        (Decision::Review, RiskLevel::High)
    } else if score >= 0.60 {
        (Decision::Review, RiskLevel::Medium)
    } else if score >= 0.30 {
        (Decision::Approve, RiskLevel::Low)
    } else {
        (Decision::Approve, RiskLevel::VeryLow)
    }
}

fn amount_score(features: &FeatureVector) -> f64 {
    let mut score = 0.0;
    if features.flag("is_large_for_user") {
        score += 0.3;
    }
    if features.flag("is_round_100") {
        score += 0.1;
    }
    match features.text("amount_category") {
        Some("very_large") => score += 0.2,
        Some("micro") => score += 0.1,
        _ => {}
    }
    score
}

fn temporal_score(features: &FeatureVector) -> f64 {
    let mut score = 0.0;
    if features.flag("is_night_time") {
        score += 0.2;
    }
    if !features.flag("in_user_preferred_time") {
        score += 0.15;
    }
    let weekend_factor = features.number("weekend_activity_factor").unwrap_or(0.5);
    if features.flag("is_weekend") && weekend_factor < 0.3 {
        score += 0.1;
    }
    score
}

fn user_behavior_score(features: &FeatureVector) -> f64 {
    let mut score = 0.0;
    if features.flag("is_very_new_account") {
        score += 0.4;
    } else if features.flag("is_new_account") {
        score += 0.2;
    }
    if !features.flag("is_kyc_verified") {
        score += 0.3;
    }
    score += features.number("user_risk_score").unwrap_or(0.0) * 0.5;
    score
}

fn merchant_risk_score(features: &FeatureVector) -> f64 {
    let mut score = 0.0;
    if features.flag("is_blacklisted_merchant") {
        score += 0.8;
    }
    if features.flag("is_high_risk_category") {
        score += 0.3;
    }
    score += features.number("merchant_fraud_rate").unwrap_or(0.0) * 2.0;
    if features.flag("suspicious_merchant_name") {
        score += 0.2;
    }
    if !features.flag("within_merchant_hours") {
        score += 0.15;
    }
    score
}

fn velocity_score(features: &FeatureVector) -> f64 {
    let mut score = 0.0;
    if features.flag("high_velocity_5min") {
        score += 0.6;
    }
    if features.flag("high_velocity_1hour") {
        score += 0.4;
    }
    if features.number("velocity_5min_count").unwrap_or(0.0) > 3.0 {
        score += 0.2;
    }
    if features.number("velocity_1hour_count").unwrap_or(0.0) > 10.0 {
        score += 0.15;
    }
    score
}

fn device_network_score(features: &FeatureVector) -> f64 {
    let mut score = 0.0;
    if features.flag("is_new_device") {
        score += 0.3;
    }
    score += features.number("ip_risk_score").unwrap_or(0.0);
    if features.flag("suspicious_user_agent") {
        score += 0.2;
    }
    score
}

//! Feature extraction
//!
//! Produces the full registered feature vector for a transaction from the
//! record itself, its attached profile snapshots and the velocity counters.
//! Extraction is deterministic and side-effect free apart from the velocity
//! reads; a failed group falls back to that group's typed defaults so the
//! vector shape stays stable.

use crate::state::{keys, StateStore};
use crate::velocity::VelocityWindow;
use riskflow_core::{FeatureVector, MerchantProfile, Transaction, UserProfile};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Earth radius used by the haversine distance, in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Merchant-name keyword classes flagged as suspicious
const CRYPTO_KEYWORDS: &[&str] = &[
    "bitcoin", "crypto", "coinbase", "binance", "blockchain", "wallet", "mining", "exchange",
];
const GIFT_CARD_KEYWORDS: &[&str] =
    &["gift card", "giftcard", "prepaid", "reload", "vanilla", "itunes"];
const MONEY_TRANSFER_KEYWORDS: &[&str] = &[
    "western union", "westernunion", "moneygram", "remit", "transfer", "wire", "paypal", "venmo",
];
const GAMBLING_KEYWORDS: &[&str] = &[
    "casino", "gambling", "betting", "lottery", "forex", "trading", "investment", "loan",
];

const HIGH_RISK_PAYMENT_KEYWORDS: &[&str] = &["prepaid", "gift", "crypto", "wire"];

/// Generates the registered feature vector for scored transactions
pub struct FeatureExtractor {
    store: Arc<dyn StateStore>,
}

impl FeatureExtractor {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Extract every feature group for a transaction
    pub async fn extract(&self, tx: &Transaction) -> FeatureVector {
        let mut features = FeatureVector::new();

        self.extract_amount(tx, &mut features);
        self.extract_temporal(tx, &mut features);
        self.extract_geographic(tx, &mut features);
        self.extract_user_behavior(tx, &mut features);
        self.extract_merchant_risk(tx, &mut features);
        self.extract_device_network(tx, &mut features);
        self.extract_velocity(tx, &mut features).await;
        self.extract_contextual(tx, &mut features);

        debug!(
            transaction_id = %tx.transaction_id,
            count = features.len(),
            "extracted features"
        );
        features
    }

    fn extract_amount(&self, tx: &Transaction, features: &mut FeatureVector) {
        let amount = tx.amount;

        features.insert("amount", amount);
        features.insert("amount_log", (1.0 + amount).ln());
        features.insert("amount_sqrt", amount.sqrt());
        features.insert("is_round_amount", amount % 1.0 == 0.0);
        features.insert("is_round_10", amount % 10.0 == 0.0);
        features.insert("is_round_100", amount % 100.0 == 0.0);

        let user_avg = known_user(tx).and_then(|p| p.avg_transaction_amount);
        match user_avg {
            Some(avg) if avg > 0.0 => {
                let ratio = amount / avg;
                features.insert("amount_to_user_avg_ratio", ratio);
                features.insert("amount_deviation_zscore", (amount - avg) / avg);
                features.insert("is_large_for_user", ratio > 3.0);
            }
            _ => {
                features.insert("amount_to_user_avg_ratio", 1.0);
                features.insert("amount_deviation_zscore", 0.0);
                features.insert("is_large_for_user", false);
            }
        }

        let merchant_avg = known_merchant(tx).and_then(|p| p.avg_transaction_amount);
        match merchant_avg {
            Some(avg) if avg > 0.0 => {
                features.insert("amount_to_merchant_avg_ratio", amount / avg);
                features.insert("is_large_for_merchant", amount > avg * 2.0);
            }
            _ => {
                features.insert("amount_to_merchant_avg_ratio", 1.0);
                features.insert("is_large_for_merchant", false);
            }
        }

        features.insert("amount_category", categorize_amount(amount));
    }

    fn extract_temporal(&self, tx: &Transaction, features: &mut FeatureVector) {
        use chrono::Datelike;

        let hour = tx.effective_hour();

        features.insert("hour_of_day", hour);
        features.insert("day_of_week", tx.timestamp.weekday().number_from_monday());
        features.insert("day_of_month", tx.timestamp.day());
        features.insert("is_weekend", tx.effective_is_weekend());
        features.insert("time_period", categorize_time_period(hour));
        features.insert("is_business_hours", (9..=17).contains(&hour));
        features.insert("is_night_time", hour <= 6 || hour >= 22);

        // Absent preferences read as "no anomaly"
        let in_preferred = match known_user(tx) {
            Some(profile) => match (profile.preferred_time_start, profile.preferred_time_end) {
                (Some(start), Some(end)) => hour >= start && hour <= end,
                _ => true,
            },
            None => true,
        };
        features.insert("in_user_preferred_time", in_preferred);
    }

    fn extract_geographic(&self, tx: &Transaction, features: &mut FeatureVector) {
        features.insert("has_geolocation", tx.geolocation.is_some());
        features.insert("has_merchant_location", tx.merchant_location.is_some());

        if let Some(geo) = tx.geolocation {
            features.insert("latitude", geo.lat);
            features.insert("longitude", geo.lon);
            features.insert("is_high_risk_country", is_high_risk_location(geo.lat, geo.lon));

            if let Some(merchant_geo) = tx.merchant_location {
                features.insert(
                    "distance_to_merchant_km",
                    haversine_km(geo.lat, geo.lon, merchant_geo.lat, merchant_geo.lon),
                );
            }
        }

        let intl_preference = known_user(tx)
            .and_then(|p| p.international_transactions)
            .unwrap_or(0.5);
        features.insert("user_intl_preference", intl_preference);
        features.insert("unexpected_intl_transaction", intl_preference < 0.1);
    }

    fn extract_user_behavior(&self, tx: &Transaction, features: &mut FeatureVector) {
        match known_user(tx) {
            Some(profile) => {
                features.insert("account_age_days", profile.account_age_days);
                features.insert("is_new_account", profile.is_new_account());
                features.insert("is_very_new_account", profile.is_very_new_account());
                features.insert("user_risk_score", profile.risk_score);
                features.insert("is_kyc_verified", profile.verified);
                features.insert("kyc_status", profile.kyc_status.as_str());
                features.insert(
                    "weekend_activity_factor",
                    profile
                        .weekend_activity
                        .unwrap_or_else(|| profile.pattern_value("weekend_activity", 0.5)),
                );
                features.insert("online_preference", profile.pattern_value("online_preference", 0.7));
                features.insert(
                    "user_avg_amount",
                    profile.avg_transaction_amount.unwrap_or(0.0),
                );
                features.insert(
                    "user_transaction_frequency",
                    profile.transaction_frequency.unwrap_or(0.0),
                );
            }
            None => {
                // Unknown users score as higher risk
                features.insert("account_age_days", 0.0);
                features.insert("is_new_account", true);
                features.insert("is_very_new_account", true);
                features.insert("user_risk_score", 0.8);
                features.insert("is_kyc_verified", false);
                features.insert("kyc_status", "unknown");
                features.insert("weekend_activity_factor", 0.5);
                features.insert("online_preference", 0.7);
                features.insert("user_avg_amount", 0.0);
                features.insert("user_transaction_frequency", 0.0);
            }
        }
    }

    fn extract_merchant_risk(&self, tx: &Transaction, features: &mut FeatureVector) {
        let hour = tx.effective_hour();

        match known_merchant(tx) {
            Some(profile) => {
                features.insert("merchant_risk_level", profile.risk_level.as_str());
                features.insert("merchant_fraud_rate", profile.fraud_rate);
                features.insert("is_blacklisted_merchant", profile.is_blacklisted);
                features.insert(
                    "merchant_category",
                    profile.category.as_deref().unwrap_or("unknown"),
                );
                features.insert("is_high_risk_category", profile.is_high_risk_category);
                features.insert("within_merchant_hours", profile.is_operating_at(hour));
                features.insert("merchant_risk_multiplier", profile.risk_multiplier);
                features.insert(
                    "suspicious_merchant_name",
                    profile
                        .name
                        .as_deref()
                        .is_some_and(is_suspicious_merchant_name),
                );
            }
            None => {
                features.insert("merchant_risk_level", "unknown");
                features.insert("merchant_fraud_rate", 0.1);
                features.insert("is_blacklisted_merchant", false);
                features.insert("merchant_category", "unknown");
                features.insert("is_high_risk_category", false);
                features.insert("within_merchant_hours", true);
                features.insert("merchant_risk_multiplier", 2.0);
                features.insert("suspicious_merchant_name", false);
            }
        }
    }

    fn extract_device_network(&self, tx: &Transaction, features: &mut FeatureVector) {
        let known_device = match (tx.device_fingerprint.as_deref(), known_user(tx)) {
            (Some(fingerprint), Some(profile)) => {
                profile.device_fingerprints.contains(fingerprint)
            }
            _ => false,
        };
        features.insert("is_known_device", known_device);
        features.insert("is_new_device", !known_device);

        let private_ip = tx.ip_address.as_deref().is_some_and(is_private_ip);
        features.insert("is_private_ip", private_ip);
        features.insert("ip_risk_score", if private_ip { 0.1 } else { 0.3 });

        features.insert(
            "suspicious_user_agent",
            tx.user_agent.as_deref().is_some_and(is_suspicious_user_agent),
        );
    }

    async fn extract_velocity(&self, tx: &Transaction, features: &mut FeatureVector) {
        let mut counts = HashMap::new();

        for window in VelocityWindow::ALL {
            let key = keys::velocity(&tx.user_id, window.label());
            let hash = self.store.get_hash(&key).await.unwrap_or_default();

            let count: u64 = hash.get("count").and_then(|v| v.parse().ok()).unwrap_or(0);
            let amount: f64 = hash.get("amount").and_then(|v| v.parse().ok()).unwrap_or(0.0);

            features.insert(&format!("velocity_{}_count", window.label()), count as f64);
            features.insert(&format!("velocity_{}_amount", window.label()), amount);
            counts.insert(window.label(), count);
        }

        features.insert("high_velocity_5min", counts.get("5min").copied().unwrap_or(0) > 5);
        features.insert(
            "high_velocity_1hour",
            counts.get("1hour").copied().unwrap_or(0) > 20,
        );
    }

    fn extract_contextual(&self, tx: &Transaction, features: &mut FeatureVector) {
        let payment_method = tx.payment_method.as_deref().unwrap_or("unknown");
        features.insert("payment_method", payment_method);
        features.insert(
            "is_high_risk_payment",
            contains_any(payment_method, HIGH_RISK_PAYMENT_KEYWORDS),
        );

        let transaction_type = tx.transaction_type.as_deref().unwrap_or("unknown");
        features.insert("transaction_type", transaction_type);
        features.insert("is_refund", transaction_type.eq_ignore_ascii_case("refund"));

        features.insert("card_type", tx.card_type.as_deref().unwrap_or("unknown"));
    }
}

/// Profile accessor that treats miss-synthesized snapshots as unknown
fn known_user(tx: &Transaction) -> Option<&UserProfile> {
    tx.user_profile.as_ref().filter(|p| !p.synthesized)
}

fn known_merchant(tx: &Transaction) -> Option<&MerchantProfile> {
    tx.merchant_profile.as_ref().filter(|p| !p.synthesized)
}

fn categorize_amount(amount: f64) -> &'static str {
    if amount < 10.0 {
        "micro"
    } else if amount < 100.0 {
        "small"
    } else if amount < 1000.0 {
        "medium"
    } else if amount < 10000.0 {
        "large"
    } else {
        "very_large"
    }
}

fn categorize_time_period(hour: u32) -> &'static str {
    match hour {
        6..=11 => "morning",
        12..=17 => "afternoon",
        18..=21 => "evening",
        _ => "night",
    }
}

/// Coarse coordinate-based risk predicate; a geo-risk database would back
/// this in a full deployment
fn is_high_risk_location(lat: f64, lon: f64) -> bool {
    lat.abs() > 60.0 || (lat.abs() < 10.0 && lon.abs() < 10.0)
}

/// Great-circle distance between two coordinates
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

fn is_suspicious_merchant_name(name: &str) -> bool {
    let normalized = name.to_lowercase();
    contains_any(&normalized, CRYPTO_KEYWORDS)
        || contains_any(&normalized, GIFT_CARD_KEYWORDS)
        || contains_any(&normalized, MONEY_TRANSFER_KEYWORDS)
        || contains_any(&normalized, GAMBLING_KEYWORDS)
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    let normalized = text.to_lowercase();
    keywords.iter().any(|kw| normalized.contains(kw))
}

fn is_private_ip(ip: &str) -> bool {
    ip.starts_with("192.168.") || ip.starts_with("10.") || ip.starts_with("172.16.")
}

fn is_suspicious_user_agent(user_agent: &str) -> bool {
    user_agent.contains("bot") || user_agent.contains("crawler") || user_agent.len() < 20
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStateStore;
    use chrono::{TimeZone, Utc};
    use riskflow_core::{registered_features, GeoPoint};

    fn create_test_transaction() -> Transaction {
        Transaction {
            transaction_id: "tx-1".to_string(),
            user_id: "u1".to_string(),
            merchant_id: "m1".to_string(),
            amount: 42.5,
            currency: Some("USD".to_string()),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 5, 14, 0, 0).unwrap(),
            payment_method: Some("credit_card".to_string()),
            card_type: Some("visa".to_string()),
            transaction_type: Some("purchase".to_string()),
            ip_address: Some("192.168.0.5".to_string()),
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/125.0".to_string()),
            device_fingerprint: Some("dev-1".to_string()),
            geolocation: None,
            merchant_location: None,
            hour_of_day: None,
            is_weekend: None,
            is_fraud: None,
            user_profile: None,
            merchant_profile: None,
            features: FeatureVector::new(),
            fraud_score: None,
            risk_level: None,
            decision: None,
            processing_time_ms: None,
        }
    }

    fn known_user_profile() -> UserProfile {
        let mut profile = UserProfile::unknown("u1");
        profile.synthesized = false;
        profile.account_age_days = 365;
        profile.risk_score = 0.1;
        profile.verified = true;
        profile.kyc_status = "verified".to_string();
        profile.avg_transaction_amount = Some(50.0);
        profile.device_fingerprints.insert("dev-1".to_string());
        profile
    }

    fn known_merchant_profile() -> MerchantProfile {
        let mut profile = MerchantProfile::unknown("m1");
        profile.synthesized = false;
        profile.name = Some("Corner Grocery".to_string());
        profile.category = Some("retail".to_string());
        profile.fraud_rate = 0.01;
        profile.avg_transaction_amount = Some(40.0);
        profile
    }

    async fn extract(tx: &Transaction) -> FeatureVector {
        let store = Arc::new(InMemoryStateStore::new());
        FeatureExtractor::new(store).extract(tx).await
    }

    #[tokio::test]
    async fn test_every_emitted_key_is_registered() {
        let mut tx = create_test_transaction();
        tx.user_profile = Some(known_user_profile());
        tx.merchant_profile = Some(known_merchant_profile());
        tx.geolocation = Some(GeoPoint { lat: 40.7, lon: -74.0 });
        tx.merchant_location = Some(GeoPoint { lat: 40.8, lon: -74.1 });

        let features = extract(&tx).await;
        let registry: Vec<&str> = registered_features().iter().map(|(n, _)| *n).collect();

        for key in features.keys() {
            assert!(registry.contains(&key.as_str()), "unregistered feature {key}");
        }
        // With full inputs, the entire registry is emitted
        assert_eq!(features.len(), registry.len());
    }

    #[tokio::test]
    async fn test_amount_features() {
        let mut tx = create_test_transaction();
        tx.amount = 200.0;
        tx.user_profile = Some(known_user_profile());
        tx.merchant_profile = Some(known_merchant_profile());

        let features = extract(&tx).await;
        assert_eq!(features.number("amount"), Some(200.0));
        assert!((features.number("amount_log").unwrap() - 201.0_f64.ln()).abs() < 1e-12);
        assert!(features.flag("is_round_amount"));
        assert!(features.flag("is_round_10"));
        assert!(features.flag("is_round_100"));
        assert_eq!(features.number("amount_to_user_avg_ratio"), Some(4.0));
        assert!(features.flag("is_large_for_user"));
        assert_eq!(features.number("amount_to_merchant_avg_ratio"), Some(5.0));
        assert!(features.flag("is_large_for_merchant"));
        assert_eq!(features.text("amount_category"), Some("medium"));
    }

    #[tokio::test]
    async fn test_amount_category_boundaries() {
        for (amount, expected) in [
            (5.0, "micro"),
            (10.0, "small"),
            (99.99, "small"),
            (100.0, "medium"),
            (1000.0, "large"),
            (10_000.0, "very_large"),
        ] {
            let mut tx = create_test_transaction();
            tx.amount = amount;
            let features = extract(&tx).await;
            assert_eq!(features.text("amount_category"), Some(expected), "amount {amount}");
        }
    }

    #[tokio::test]
    async fn test_temporal_night_hour_23() {
        let mut tx = create_test_transaction();
        tx.hour_of_day = Some(23);

        let features = extract(&tx).await;
        assert!(features.flag("is_night_time"));
        assert!(!features.flag("is_business_hours"));
        assert_eq!(features.text("time_period"), Some("night"));
    }

    #[tokio::test]
    async fn test_temporal_business_afternoon() {
        let features = extract(&create_test_transaction()).await;
        assert_eq!(features.number("hour_of_day"), Some(14.0));
        assert!(features.flag("is_business_hours"));
        assert!(!features.flag("is_night_time"));
        assert_eq!(features.text("time_period"), Some("afternoon"));
        // 2024-06-05 is a Wednesday
        assert_eq!(features.number("day_of_week"), Some(3.0));
        assert!(!features.flag("is_weekend"));
    }

    #[tokio::test]
    async fn test_preferred_time_bounds_inclusive() {
        let mut profile = known_user_profile();
        profile.preferred_time_start = Some(9);
        profile.preferred_time_end = Some(14);

        let mut tx = create_test_transaction();
        tx.user_profile = Some(profile);

        let features = extract(&tx).await;
        assert!(features.flag("in_user_preferred_time"));

        let mut late = create_test_transaction();
        late.hour_of_day = Some(15);
        late.user_profile = tx.user_profile.clone();
        let features = extract(&late).await;
        assert!(!features.flag("in_user_preferred_time"));
    }

    #[tokio::test]
    async fn test_geographic_missing_location() {
        let features = extract(&create_test_transaction()).await;
        assert!(!features.flag("has_geolocation"));
        assert!(!features.contains("latitude"));
        assert!(!features.contains("distance_to_merchant_km"));
    }

    #[tokio::test]
    async fn test_haversine_zero_and_symmetric() {
        assert!(haversine_km(48.2, 16.4, 48.2, 16.4).abs() < 1e-9);

        let d1 = haversine_km(48.2, 16.4, 52.5, 13.4);
        let d2 = haversine_km(52.5, 13.4, 48.2, 16.4);
        assert!((d1 - d2).abs() < 1e-9);
        // Vienna to Berlin is roughly 520 km
        assert!(d1 > 450.0 && d1 < 600.0);
    }

    #[tokio::test]
    async fn test_high_risk_location_predicate() {
        let mut tx = create_test_transaction();
        tx.geolocation = Some(GeoPoint { lat: 65.0, lon: 20.0 });
        let features = extract(&tx).await;
        assert!(features.flag("is_high_risk_country"));

        tx.geolocation = Some(GeoPoint { lat: 5.0, lon: 5.0 });
        let features = extract(&tx).await;
        assert!(features.flag("is_high_risk_country"));

        tx.geolocation = Some(GeoPoint { lat: 40.7, lon: -74.0 });
        let features = extract(&tx).await;
        assert!(!features.flag("is_high_risk_country"));
    }

    #[tokio::test]
    async fn test_unknown_user_defaults() {
        let features = extract(&create_test_transaction()).await;
        assert_eq!(features.number("user_risk_score"), Some(0.8));
        assert!(features.flag("is_very_new_account"));
        assert!(!features.flag("is_kyc_verified"));
        assert_eq!(features.text("kyc_status"), Some("unknown"));
    }

    #[tokio::test]
    async fn test_synthesized_profile_treated_as_unknown() {
        let mut tx = create_test_transaction();
        tx.user_profile = Some(UserProfile::unknown("u1"));
        tx.merchant_profile = Some(MerchantProfile::unknown("m1"));

        let features = extract(&tx).await;
        assert_eq!(features.number("user_risk_score"), Some(0.8));
        assert_eq!(features.text("merchant_risk_level"), Some("unknown"));
        assert_eq!(features.number("merchant_fraud_rate"), Some(0.1));
        assert_eq!(features.number("merchant_risk_multiplier"), Some(2.0));
    }

    #[tokio::test]
    async fn test_suspicious_merchant_names() {
        for name in [
            "CryptoMax Exchange",
            "Vanilla Prepaid Reload",
            "Western Union Outlet",
            "Lucky Casino Betting",
        ] {
            let mut merchant = known_merchant_profile();
            merchant.name = Some(name.to_string());
            let mut tx = create_test_transaction();
            tx.merchant_profile = Some(merchant);

            let features = extract(&tx).await;
            assert!(features.flag("suspicious_merchant_name"), "name {name}");
        }

        let features = {
            let mut tx = create_test_transaction();
            tx.merchant_profile = Some(known_merchant_profile());
            extract(&tx).await
        };
        assert!(!features.flag("suspicious_merchant_name"));
    }

    #[tokio::test]
    async fn test_device_network_features() {
        let mut tx = create_test_transaction();
        tx.user_profile = Some(known_user_profile());

        let features = extract(&tx).await;
        assert!(features.flag("is_known_device"));
        assert!(!features.flag("is_new_device"));
        assert!(features.flag("is_private_ip"));
        assert_eq!(features.number("ip_risk_score"), Some(0.1));
        assert!(!features.flag("suspicious_user_agent"));

        tx.device_fingerprint = Some("dev-other".to_string());
        tx.ip_address = Some("8.8.8.8".to_string());
        tx.user_agent = Some("curl-bot".to_string());
        let features = extract(&tx).await;
        assert!(features.flag("is_new_device"));
        assert!(!features.flag("is_private_ip"));
        assert_eq!(features.number("ip_risk_score"), Some(0.3));
        assert!(features.flag("suspicious_user_agent"));
    }

    #[tokio::test]
    async fn test_velocity_features_from_store() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut hash = HashMap::new();
        hash.insert("count".to_string(), "6".to_string());
        hash.insert("amount".to_string(), "6.0".to_string());
        store.seed_hash("velocity:u1:5min", hash);

        let extractor = FeatureExtractor::new(store);
        let features = extractor.extract(&create_test_transaction()).await;

        assert_eq!(features.number("velocity_5min_count"), Some(6.0));
        assert_eq!(features.number("velocity_5min_amount"), Some(6.0));
        assert!(features.flag("high_velocity_5min"));
        assert!(!features.flag("high_velocity_1hour"));
        assert_eq!(features.number("velocity_24hour_count"), Some(0.0));
    }

    #[tokio::test]
    async fn test_contextual_features() {
        let mut tx = create_test_transaction();
        tx.payment_method = Some("prepaid_card".to_string());
        tx.transaction_type = Some("REFUND".to_string());

        let features = extract(&tx).await;
        assert!(features.flag("is_high_risk_payment"));
        assert!(features.flag("is_refund"));
        assert_eq!(features.text("card_type"), Some("visa"));

        tx.payment_method = None;
        let features = extract(&tx).await;
        assert_eq!(features.text("payment_method"), Some("unknown"));
        assert!(!features.flag("is_high_risk_payment"));
    }
}

use chrono::Utc;
use serde_json::json;

use super::*;
use crate::database::sqlite::{NewService, Source, SourceFlags};

fn record(description: &str, origin_title: Option<&str>, manifest: serde_json::Value) -> ServiceRecord {
    let now = Utc::now();
    ServiceRecord {
        id: 1,
        service: NewService {
            resource: "https://api.example.com/data".to_string(),
            description: description.to_string(),
            network: "base".to_string(),
            asset: "USDC".to_string(),
            max_amount: 100,
            pay_to: "0xpayee".to_string(),
            manifest,
            trust_transaction_count: 0,
            trust_last_seen: None,
            trust_origin_title: origin_title.map(str::to_string),
            trust_origin_description: None,
            score_confidence: 0.5,
            score_performance_ms: None,
            score_reliability: 0.5,
            score_popularity: 0,
            score_unique_users: 0,
            sources: SourceFlags::only(Source::Bazaar),
            last_updated: now,
        },
        created_at: now,
        updated_at: now,
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn bare_record_scores_base() {
    let policy = ScoringPolicy::default();
    let sparse = record("short", None, json!({}));
    assert!(approx(policy.foundation_score(&sparse), 0.5));
}

#[test]
fn complete_record_scores_full() {
    let policy = ScoringPolicy::default();
    let rich = record(
        "Detailed hourly weather forecasts for any city",
        Some("Weather Co"),
        json!({"accepts": [{"network": "base"}]}),
    );
    assert!(approx(policy.foundation_score(&rich), 1.0));
}

#[test]
fn description_bonus_needs_more_than_ten_chars() {
    let policy = ScoringPolicy::default();
    assert!(approx(
        policy.foundation_score(&record("0123456789", None, json!({}))),
        0.5
    ));
    assert!(approx(
        policy.foundation_score(&record("0123456789a", None, json!({}))),
        0.7
    ));
}

#[test]
fn empty_accepts_earns_no_bonus() {
    let policy = ScoringPolicy::default();
    let rec = record("short", None, json!({"accepts": []}));
    assert!(approx(policy.foundation_score(&rec), 0.5));
}

#[test]
fn foundation_is_capped() {
    let policy = ScoringPolicy {
        base: 0.9,
        ..ScoringPolicy::default()
    };
    let rich = record(
        "A long enough description",
        Some("Title"),
        json!({"accepts": [{}]}),
    );
    assert!(approx(policy.foundation_score(&rich), 1.0));
}

#[test]
fn final_score_blends_equally_by_default() {
    let policy = ScoringPolicy::default();
    assert!(approx(policy.final_score(0.5, 0.8), 0.65));
    assert!(approx(policy.final_score(1.0, 0.8), 0.9));
}

#[test]
fn custom_weights() {
    let policy = ScoringPolicy {
        foundation_weight: 0.2,
        similarity_weight: 0.8,
        ..ScoringPolicy::default()
    };
    assert!(approx(policy.final_score(1.0, 0.5), 0.6));
}

#[test]
fn validation_rejects_negative_and_non_finite() {
    assert!(ScoringPolicy::default().validate().is_ok());

    let negative = ScoringPolicy {
        accepts_bonus: -0.1,
        ..ScoringPolicy::default()
    };
    let err = negative.validate().expect_err("negative weight rejected");
    assert_eq!(err.name, "accepts_bonus");

    let nan = ScoringPolicy {
        similarity_weight: f64::NAN,
        ..ScoringPolicy::default()
    };
    assert!(nan.validate().is_err());
}

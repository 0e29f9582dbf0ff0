use chrono::Utc;
use serde_json::json;

use super::*;

fn sample_service() -> NewService {
    NewService {
        resource: "https://api.example.com/weather".to_string(),
        description: "Weather forecasts".to_string(),
        network: "base".to_string(),
        asset: "0xasset".to_string(),
        max_amount: 1000,
        pay_to: "0xpayee".to_string(),
        manifest: json!({"accepts": [{"network": "base"}]}),
        trust_transaction_count: 0,
        trust_last_seen: None,
        trust_origin_title: None,
        trust_origin_description: None,
        score_confidence: 0.5,
        score_performance_ms: None,
        score_reliability: 0.5,
        score_popularity: 0,
        score_unique_users: 0,
        sources: SourceFlags::only(Source::Bazaar),
        last_updated: Utc::now(),
    }
}

#[test]
fn source_display() {
    assert_eq!(Source::Bazaar.to_string(), "bazaar");
    assert_eq!(Source::X402scan.to_string(), "x402scan");
    assert_eq!(Source::Xgate.to_string(), "xgate");
}

#[test]
fn source_flags_only_sets_one_flag() {
    let flags = SourceFlags::only(Source::Xgate);
    assert!(flags.contains(Source::Xgate));
    assert!(!flags.contains(Source::Bazaar));
    assert!(!flags.contains(Source::X402scan));
}

#[test]
fn record_serializes_flat() {
    let now = Utc::now();
    let record = ServiceRecord {
        id: 7,
        service: sample_service(),
        created_at: now,
        updated_at: now,
    };

    let value = serde_json::to_value(&record).expect("record should serialize");
    assert_eq!(value["id"], 7);
    assert_eq!(value["resource"], "https://api.example.com/weather");
    assert_eq!(value["source_bazaar"], true);
    assert_eq!(value["source_xgate"], false);
    assert_eq!(value["manifest"]["accepts"][0]["network"], "base");

    let parsed: ServiceRecord = serde_json::from_value(value).expect("record should parse");
    assert_eq!(parsed.id, 7);
    assert_eq!(parsed.service.resource, record.service.resource);
    assert_eq!(parsed.service.sources, record.service.sources);
}

#[test]
fn origin_title_presence() {
    let now = Utc::now();
    let mut record = ServiceRecord {
        id: 1,
        service: sample_service(),
        created_at: now,
        updated_at: now,
    };
    assert!(!record.has_origin_title());

    record.service.trust_origin_title = Some(String::new());
    assert!(!record.has_origin_title());

    record.service.trust_origin_title = Some("Weather Co".to_string());
    assert!(record.has_origin_title());
}

#[test]
fn cache_entry_expiry_is_exclusive() {
    let entry = CacheEntry {
        key: "k".to_string(),
        value: "1".to_string(),
        expiry: 100,
    };
    assert!(!entry.is_expired(99));
    assert!(!entry.is_expired(100));
    assert!(entry.is_expired(101));
}

#[test]
fn stats_helpers() {
    let stats = StoreStats {
        services: 10,
        embeddings: 7,
        db_size_bytes: 2 * 1024 * 1024,
        cache_pruned: 0,
    };
    assert_eq!(stats.missing_embeddings(), 3);
    assert!((stats.db_size_mb() - 2.0).abs() < f64::EPSILON);
}

use super::*;
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

fn service(resource: &str) -> NewService {
    NewService {
        resource: resource.to_string(),
        description: "Token price oracle".to_string(),
        network: "base-sepolia".to_string(),
        asset: "USDC".to_string(),
        max_amount: 100,
        pay_to: "0xpay".to_string(),
        manifest: json!({"accepts": []}),
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

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> =
        ["services", "embeddings", "cache"].into_iter().collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn reopening_keeps_data() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let id = {
        let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
        database
            .upsert_service(&service("https://persist.example.com/"))
            .await?
    };

    let reopened = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let stored = reopened
        .get_service_by_resource("https://persist.example.com/")
        .await?
        .expect("service should survive reopen");
    assert_eq!(stored.id, id);

    Ok(())
}

#[tokio::test]
async fn typed_cache_round_trip() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let payload = json!([{"id": 3, "final_score": 0.75, "nested": {"tags": ["x"]}}]);
    database.cache_set("key", &payload, 900).await?;

    let cached: Option<serde_json::Value> = database.cache_get("key").await?;
    assert_eq!(cached, Some(payload));

    let missing: Option<serde_json::Value> = database.cache_get("other").await?;
    assert!(missing.is_none());

    Ok(())
}

#[tokio::test]
async fn entry_written_in_the_past_reads_as_expired() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let now = Utc::now().timestamp();
    CacheQueries::set(database.pool(), "expired", "\"old\"", 0, now - 10).await?;

    let cached: Option<String> = database.cache_get("expired").await?;
    assert!(cached.is_none());
    assert!(!database.cache_delete("expired").await?);

    Ok(())
}

#[tokio::test]
async fn unreadable_cache_entry_is_discarded() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    CacheQueries::set(
        database.pool(),
        "corrupt",
        "{not json",
        900,
        Utc::now().timestamp(),
    )
    .await?;

    let cached: Option<serde_json::Value> = database.cache_get("corrupt").await?;
    assert!(cached.is_none());
    assert!(!database.cache_delete("corrupt").await?);

    Ok(())
}

#[tokio::test]
async fn stats_count_and_prune() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let a = database
        .upsert_service(&service("https://a.example.com/"))
        .await?;
    database
        .upsert_service(&service("https://b.example.com/"))
        .await?;
    database.upsert_embedding(a, &[0.5, 0.5], 2).await?;

    let now = Utc::now().timestamp();
    CacheQueries::set(database.pool(), "stale", "1", 0, now - 100).await?;
    database.cache_set("fresh", &1, 900).await?;

    let stats = database.stats().await?;
    assert_eq!(stats.services, 2);
    assert_eq!(stats.embeddings, 1);
    assert_eq!(stats.missing_embeddings(), 1);
    assert_eq!(stats.cache_pruned, 1);
    assert!(stats.db_size_bytes > 0);

    let fresh: Option<i64> = database.cache_get("fresh").await?;
    assert_eq!(fresh, Some(1));

    Ok(())
}

#[tokio::test]
async fn optimize_runs() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database
        .upsert_service(&service("https://opt.example.com/"))
        .await?;
    database.optimize().await?;
    assert_eq!(database.count_services().await?, 1);
    Ok(())
}

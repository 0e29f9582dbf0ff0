#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! End-to-end tests: Bazaar listings are fetched, normalized, stored,
//! embedded through the Ollama backend and searched. Both upstreams are
//! served by wiremock, so no network or model is required.

use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use x402_search::config::{Config, OllamaConfig};
use x402_search::database::sqlite::{Database, Source};
use x402_search::embeddings::{EmbeddingProvider, OllamaProvider};
use x402_search::ingest::{BazaarClient, Ingestor};
use x402_search::search::{SearchEngine, SearchOptions};

/// Keyword embedding: weather texts point along x, translation texts along y
fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    if text.contains("weather") {
        vec![1.0, 0.0, 0.1]
    } else if text.contains("translat") {
        vec![0.0, 1.0, 0.1]
    } else {
        vec![0.0, 0.0, 1.0]
    }
}

fn request_json(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap_or(Value::Null)
}

async fn start_ollama() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "all-minilm:latest"}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(|request: &Request| {
            let prompt = request_json(request)["prompt"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            ResponseTemplate::new(200).set_body_json(json!({"embedding": keyword_vector(&prompt)}))
        })
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(|request: &Request| {
            let embeddings: Vec<Vec<f32>> = request_json(request)["input"]
                .as_array()
                .map(|inputs| {
                    inputs
                        .iter()
                        .map(|input| keyword_vector(input.as_str().unwrap_or_default()))
                        .collect()
                })
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": embeddings}))
        })
        .mount(&server)
        .await;

    server
}

fn listing(resource: &str, name: &str, description: &str, tags: &[&str]) -> Value {
    json!({
        "resource": resource,
        "lastUpdated": "2025-05-30T08:15:00Z",
        "accepts": [{
            "network": "base",
            "asset": "0xusdc",
            "maxAmountRequired": "10000",
            "payTo": "0xpayee",
            "description": description
        }],
        "metadata": {
            "name": name,
            "tags": tags,
            "paymentAnalytics": {"totalTransactions": 42, "totalUniqueUsers": 7}
        }
    })
}

async fn start_bazaar() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                listing(
                    "https://api.weather-x.io/v2/forecast",
                    "WeatherX",
                    "Hourly weather forecasts for any city",
                    &["weather"]
                ),
                listing(
                    "https://lingo.example.com/translate",
                    "Lingo",
                    "Translate text between forty languages",
                    &["translation"]
                ),
                {"resource": "https://free.example.com/", "accepts": []}
            ],
            "pagination": {"total": 3}
        })))
        .mount(&server)
        .await;

    server
}

fn test_config(temp_dir: &TempDir, ollama: &MockServer, bazaar: &MockServer) -> Config {
    let address = ollama.address();
    let mut config = Config::load(temp_dir.path()).expect("defaults load without a file");

    config.ollama = OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        model: "all-minilm".to_string(),
        embedding_dimension: 3,
        retry_attempts: 1,
        ..OllamaConfig::default()
    };
    config.bazaar.base_url = bazaar.uri();
    config.bazaar.page_delay_ms = 0;
    config.bazaar.retry_delay_ms = 0;
    config
}

#[tokio::test]
async fn ingest_then_search() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let ollama = start_ollama().await;
    let bazaar = start_bazaar().await;
    let config = test_config(&temp_dir, &ollama, &bazaar);

    let database = Database::initialize_from_config_dir(config.get_base_dir()).await?;
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(OllamaProvider::new(&config.ollama)?);

    let report = Ingestor::new(database.clone(), Arc::clone(&provider))
        .with_progress(false)
        .run(&BazaarClient::new(&config.bazaar)?)
        .await?;

    assert_eq!(report.fetched, 3);
    assert_eq!(report.stored, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.embedded, 2);
    assert_eq!(database.count_embeddings().await?, 2);
    assert!(provider.is_ready());

    let stored = database
        .get_service_by_resource("https://api.weather-x.io/v2/forecast")
        .await?
        .expect("weather service stored");
    assert!(stored.service.sources.contains(Source::Bazaar));
    assert_eq!(stored.service.trust_transaction_count, 42);

    let engine = SearchEngine::new(database.clone(), provider)
        .with_policy(config.scoring)
        .with_cache_ttl(config.search.cache_ttl_secs);

    let hits = engine.search("weather", SearchOptions::default()).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0].record.service.resource,
        "https://api.weather-x.io/v2/forecast"
    );
    assert!(hits[0].similarity_score > 0.99);
    // Description, title and payment option all present
    assert!((hits[0].foundation_score - 1.0).abs() < 1e-9);

    let translations = engine
        .search("translate this", SearchOptions::default())
        .await?;
    assert_eq!(translations.len(), 1);
    assert_eq!(
        translations[0].record.service.resource,
        "https://lingo.example.com/translate"
    );

    Ok(())
}

#[tokio::test]
async fn repeated_search_is_served_from_cache() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let ollama = start_ollama().await;
    let bazaar = start_bazaar().await;
    let config = test_config(&temp_dir, &ollama, &bazaar);

    let database = Database::initialize_from_config_dir(config.get_base_dir()).await?;
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(OllamaProvider::new(&config.ollama)?);

    Ingestor::new(database.clone(), Arc::clone(&provider))
        .with_progress(false)
        .run(&BazaarClient::new(&config.bazaar)?)
        .await?;

    let engine = SearchEngine::new(database, provider);
    let single_embeds = || async {
        ollama
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == "/api/embeddings")
            .count()
    };

    let first = engine.search("weather", SearchOptions::default()).await?;
    let after_first = single_embeds().await;

    let second = engine.search("weather", SearchOptions::default()).await?;
    assert_eq!(single_embeds().await, after_first);
    assert_eq!(first.len(), second.len());
    assert_eq!(first[0].record.id, second[0].record.id);

    let bypass = SearchOptions {
        use_cache: false,
        ..SearchOptions::default()
    };
    engine.search("weather", bypass).await?;
    assert_eq!(single_embeds().await, after_first + 1);

    Ok(())
}

#[tokio::test]
async fn unreachable_model_makes_search_unavailable() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;

    let ollama = MockServer::start().await;
    let address = ollama.address();
    let config = OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        model: "all-minilm".to_string(),
        embedding_dimension: 3,
        retry_attempts: 1,
        ..OllamaConfig::default()
    };
    // No mocks mounted: every request gets a 404
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(OllamaProvider::new(&config)?);
    let engine = SearchEngine::new(database, provider);

    let result = engine.search("weather", SearchOptions::default()).await;
    assert!(matches!(
        result,
        Err(x402_search::IndexError::SearchUnavailable(_))
    ));
    Ok(())
}

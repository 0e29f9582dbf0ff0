use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;

fn config_for(server: &MockServer) -> OllamaConfig {
    let address = server.address();
    OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        model: "all-minilm".to_string(),
        embedding_dimension: 3,
        retry_attempts: 1,
        ..OllamaConfig::default()
    }
}

async fn mount_tags(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "all-minilm:latest", "size": 45_000_000, "digest": "abc"}]
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_single_embedding(server: &MockServer, embedding: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": embedding })))
        .mount(server)
        .await;
}

#[test]
fn client_creation() {
    let config = OllamaConfig::default();
    let client = OllamaClient::new(&config).expect("client builds from defaults");
    assert_eq!(client.model(), "all-minilm:latest");
    assert_eq!(client.batch_size, 32);
    assert_eq!(client.retry_attempts, 3);

    let client = client
        .with_timeout(Duration::from_secs(5))
        .with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);
}

#[tokio::test]
async fn model_validation_accepts_latest_tag() {
    let server = MockServer::start().await;
    mount_tags(&server, 2).await;

    let config = config_for(&server);
    let matches = tokio::task::spawn_blocking(move || {
        let client = OllamaClient::new(&config).expect("client builds");
        let bare = client.validate_model().is_ok();

        let mut other = config.clone();
        other.model = "nomic-embed-text".to_string();
        let missing = OllamaClient::new(&other)
            .expect("client builds")
            .validate_model()
            .is_err();
        (bare, missing)
    })
    .await
    .expect("blocking task completes");

    assert_eq!(matches, (true, true));
}

#[tokio::test]
async fn initialize_loads_once_for_concurrent_callers() {
    let server = MockServer::start().await;
    mount_tags(&server, 1).await;
    mount_single_embedding(&server, json!([0.1, 0.2, 0.3])).await;

    let provider = Arc::new(OllamaProvider::new(&config_for(&server)).expect("provider builds"));
    assert!(!provider.is_ready());

    let (a, b, c) = tokio::join!(
        provider.initialize(),
        provider.initialize(),
        provider.initialize()
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert!(provider.is_ready());

    provider.initialize().await.expect("already loaded");
    assert_eq!(provider.dimensions(), 3);
    assert_eq!(provider.model(), "all-minilm");
}

#[tokio::test]
async fn unavailable_model_is_model_load_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(&config_for(&server)).expect("provider builds");
    let err = provider.initialize().await.expect_err("model missing");
    assert!(matches!(err, IndexError::ModelLoad(_)));
    assert!(!provider.is_ready());

    let err = provider
        .embed("hello", EmbedOptions::default())
        .await
        .expect_err("embed requires a loaded model");
    assert!(matches!(err, IndexError::ModelLoad(_)));
}

#[tokio::test]
async fn load_timeout_is_reported_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"models": [{"name": "all-minilm:latest"}]}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(&config_for(&server))
        .expect("provider builds")
        .with_load_timeout(Duration::from_millis(100));

    let err = provider.initialize().await.expect_err("load times out");
    assert!(matches!(err, IndexError::ModelLoad(_)));
}

#[tokio::test]
async fn embed_normalizes_by_default() {
    let server = MockServer::start().await;
    mount_tags(&server, 1).await;
    mount_single_embedding(&server, json!([3.0, 4.0, 0.0])).await;

    let provider = OllamaProvider::new(&config_for(&server)).expect("provider builds");

    let normalized = provider
        .embed("weather", EmbedOptions::default())
        .await
        .expect("embedding succeeds");
    assert!((normalized[0] - 0.6).abs() < 1e-6);
    assert!((normalized[1] - 0.8).abs() < 1e-6);

    let raw = provider
        .embed(
            "weather",
            EmbedOptions {
                normalize: false,
                ..EmbedOptions::default()
            },
        )
        .await
        .expect("embedding succeeds");
    assert_eq!(raw, vec![3.0, 4.0, 0.0]);
}

#[tokio::test]
async fn cls_pooling_is_rejected() {
    let server = MockServer::start().await;
    let provider = OllamaProvider::new(&config_for(&server)).expect("provider builds");

    let err = provider
        .embed(
            "weather",
            EmbedOptions {
                pooling: Pooling::Cls,
                normalize: true,
            },
        )
        .await
        .expect_err("cls pooling unsupported");
    assert!(matches!(err, IndexError::Embedding(_)));
}

#[tokio::test]
async fn unexpected_dimensions_are_returned_unchanged() {
    let server = MockServer::start().await;
    mount_tags(&server, 1).await;
    mount_single_embedding(&server, json!([1.0, 0.0, 0.0, 0.0, 0.0])).await;

    let provider = OllamaProvider::new(&config_for(&server)).expect("provider builds");
    let vector = provider
        .embed("weather", EmbedOptions::default())
        .await
        .expect("embedding succeeds");
    assert_eq!(vector.len(), 5);
}

#[tokio::test]
async fn batch_uses_native_endpoint_and_keeps_order() {
    let server = MockServer::start().await;
    mount_tags(&server, 1).await;
    mount_single_embedding(&server, json!([1.0, 0.0, 0.0])).await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[2.0, 0.0, 0.0], [0.0, 5.0, 0.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(&config_for(&server)).expect("provider builds");
    let texts = vec!["first".to_string(), "second".to_string()];
    let vectors = provider.embed_batch(&texts).await.expect("batch succeeds");

    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    assert!(provider.embed_batch(&[]).await.expect("empty batch").is_empty());
}

#[tokio::test]
async fn batch_count_mismatch_fails_whole_batch() {
    let server = MockServer::start().await;
    mount_tags(&server, 1).await;
    mount_single_embedding(&server, json!([1.0, 0.0, 0.0])).await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0, 0.0]]
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(&config_for(&server)).expect("provider builds");
    let texts = vec!["first".to_string(), "second".to_string()];
    let err = provider.embed_batch(&texts).await.expect_err("count mismatch");
    assert!(matches!(err, IndexError::Embedding(_)));
}

#[tokio::test]
async fn server_error_is_embedding_error() {
    let server = MockServer::start().await;
    mount_tags(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(&config_for(&server)).expect("provider builds");
    let err = provider
        .embed("weather", EmbedOptions::default())
        .await
        .expect_err("server error surfaces");
    // The warm-up embed hits the same failing endpoint
    assert!(matches!(err, IndexError::ModelLoad(_)));
}

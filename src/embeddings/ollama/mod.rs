#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EmbedOptions, EmbeddingProvider, Pooling, l2_normalize};
use crate::IndexError;
use crate::config::OllamaConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking HTTP client for a local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    model: String,
    #[serde(rename = "input")]
    inputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let timeout = if config.timeout_secs == 0 {
            DEFAULT_TIMEOUT_SECONDS
        } else {
            config.timeout_secs
        };

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            agent,
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        // Listing models doubles as the reachability check
        self.validate_model().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Validate that the configured model is available. A bare model name
    /// matches its `:latest` tag.
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        debug!("Validating model: {}", self.model);

        let models = self.list_models().context("Failed to list models")?;
        let tagged = format!("{}:latest", self.model);

        if models
            .iter()
            .any(|m| m.name == self.model || m.name == tagged)
        {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Raw (unnormalized) embedding for a single text
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let url = self
            .base_url
            .join("/api/embeddings")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        debug!(
            "Generated embedding with {} dimensions",
            embed_response.embedding.len()
        );

        Ok(embed_response.embedding)
    }

    /// Embeddings for many texts, sent `batch_size` at a time. Output order
    /// matches input order.
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size as usize) {
            let batch_results = self
                .generate_embeddings_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;

            results.extend(batch_results);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn generate_embeddings_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = BatchEmbedRequest {
            model: self.model.clone(),
            inputs: texts.to_vec(),
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build batch embedding URL")?;

        let request_json = serde_json::to_string(&request)
            .context("Failed to serialize batch embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate batch embeddings")?;

        let batch_response: BatchEmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse batch embedding response")?;

        if batch_response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                batch_response.embeddings.len()
            ));
        }

        Ok(batch_response.embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    // Exponential backoff
                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// Run a blocking client call off the async runtime, bounded by `limit`.
/// A timeout is reported the same way as any other failure.
async fn run_blocking<T, F>(
    client: &OllamaClient,
    limit: Duration,
    call: F,
) -> std::result::Result<T, String>
where
    F: FnOnce(&OllamaClient) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let client = client.clone();
    let task = tokio::task::spawn_blocking(move || call(&client));

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
        Ok(Err(join_error)) => Err(format!("embedding task failed: {}", join_error)),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

/// [`EmbeddingProvider`] backed by an Ollama server.
///
/// Ollama pools server-side with the model's own (mean) pooling, so only
/// [`Pooling::Mean`] is accepted. Normalization happens client-side.
#[derive(Debug)]
pub struct OllamaProvider {
    client: OllamaClient,
    dimensions: usize,
    request_timeout: Duration,
    load_timeout: Duration,
    loaded: OnceCell<()>,
}

impl OllamaProvider {
    #[inline]
    pub fn new(config: &OllamaConfig) -> crate::Result<Self> {
        let client = OllamaClient::new(config)
            .map_err(|e| IndexError::Config(format!("Invalid Ollama configuration: {:#}", e)))?;

        Ok(Self {
            client,
            dimensions: config.embedding_dimension as usize,
            request_timeout: Duration::from_secs(config.timeout_secs.max(1)),
            load_timeout: Duration::from_secs(config.load_timeout_secs.max(1)),
            loaded: OnceCell::new(),
        })
    }

    #[inline]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    fn check_dimensions(&self, found: usize) {
        if found != self.dimensions {
            warn!(
                "Model {} produced {} dimensions, configured for {}",
                self.client.model(),
                found,
                self.dimensions
            );
        }
    }

    fn finish(&self, mut vector: Vec<f32>, options: EmbedOptions) -> Vec<f32> {
        self.check_dimensions(vector.len());
        if options.normalize {
            l2_normalize(&mut vector);
        }
        vector
    }

    async fn load(&self) -> crate::Result<()> {
        info!("Loading embedding model: {}", self.client.model());
        let start = Instant::now();

        let warmup = run_blocking(&self.client, self.load_timeout, |client| {
            client.health_check()?;
            client.generate_embedding("warmup")
        })
        .await
        .map_err(|e| {
            error!("Failed to load embedding model: {}", e);
            IndexError::ModelLoad(e)
        })?;

        self.check_dimensions(warmup.len());
        info!(
            "Embedding model loaded in {}ms",
            start.elapsed().as_millis()
        );
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    #[inline]
    async fn initialize(&self) -> crate::Result<()> {
        self.loaded.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    #[inline]
    async fn embed(&self, text: &str, options: EmbedOptions) -> crate::Result<Vec<f32>> {
        if options.pooling != Pooling::Mean {
            return Err(IndexError::Embedding(format!(
                "Pooling strategy {:?} is not supported by the Ollama backend",
                options.pooling
            )));
        }

        self.initialize().await?;

        let start = Instant::now();
        let text = text.to_string();
        let vector = run_blocking(&self.client, self.request_timeout, move |client| {
            client.generate_embedding(&text)
        })
        .await
        .map_err(IndexError::Embedding)?;

        debug!(
            "Generated embedding in {}ms ({} dims)",
            start.elapsed().as_millis(),
            vector.len()
        );
        Ok(self.finish(vector, options))
    }

    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.initialize().await?;

        let start = Instant::now();
        let chunks = texts.len().div_ceil(self.client.batch_size as usize);
        let limit = self
            .request_timeout
            .saturating_mul(u32::try_from(chunks).unwrap_or(u32::MAX));
        let owned = texts.to_vec();
        let vectors = run_blocking(&self.client, limit, move |client| {
            client.generate_embeddings_batch(&owned)
        })
        .await
        .map_err(IndexError::Embedding)?;

        info!(
            "Generated {} embeddings in {}ms",
            vectors.len(),
            start.elapsed().as_millis()
        );

        let options = EmbedOptions::default();
        Ok(vectors
            .into_iter()
            .map(|vector| self.finish(vector, options))
            .collect())
    }

    #[inline]
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    fn model(&self) -> &str {
        self.client.model()
    }

    #[inline]
    fn is_ready(&self) -> bool {
        self.loaded.initialized()
    }
}

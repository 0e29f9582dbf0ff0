// Embeddings module
// Turns text into fixed-length vectors and compares them

pub mod ollama;
pub mod similarity;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;

pub use ollama::{OllamaClient, OllamaProvider};
pub use similarity::{cosine_similarity, l2_normalize};

/// Texts per chunk when embedding in bulk; bounds peak memory, not throughput
pub const EMBED_BATCH_SIZE: usize = 32;

/// How token outputs are reduced to one sentence vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Mean,
    /// First-token (CLS) pooling
    Cls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedOptions {
    pub pooling: Pooling,
    pub normalize: bool,
}

impl Default for EmbedOptions {
    #[inline]
    fn default() -> Self {
        Self {
            pooling: Pooling::Mean,
            normalize: true,
        }
    }
}

/// Text embedding backend.
///
/// Dimensionality and model identifier are fixed at construction. The model
/// is loaded lazily, at most once; `embed` initializes implicitly.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Load the model. Idempotent; concurrent callers share one load.
    async fn initialize(&self) -> Result<()>;

    async fn embed(&self, text: &str, options: EmbedOptions) -> Result<Vec<f32>>;

    /// Embed `texts` in chunks of [`EMBED_BATCH_SIZE`], preserving input order.
    /// The first failing chunk aborts the whole batch.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            let options = EmbedOptions::default();
            let vectors = try_join_all(chunk.iter().map(|text| self.embed(text, options))).await?;
            results.extend(vectors);
            debug!("{}/{} embeddings generated", results.len(), texts.len());
        }

        Ok(results)
    }

    fn dimensions(&self) -> usize;

    fn model(&self) -> &str;

    /// Whether the model has finished loading
    fn is_ready(&self) -> bool;
}

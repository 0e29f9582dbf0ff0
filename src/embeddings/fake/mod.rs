// Deterministic in-memory provider for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{EmbedOptions, EmbeddingProvider, l2_normalize};
use crate::{IndexError, Result};

/// Returns a configured vector per exact text, `fallback` otherwise.
/// Texts containing a failing marker produce an `Embedding` error.
#[derive(Debug)]
pub(crate) struct FakeProvider {
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    failing_markers: Vec<String>,
    fail_initialize: bool,
    embed_calls: AtomicUsize,
    ready: AtomicBool,
}

impl FakeProvider {
    pub(crate) fn new(dimensions: usize) -> Self {
        let mut fallback = vec![0.0; dimensions];
        if let Some(first) = fallback.first_mut() {
            *first = 1.0;
        }

        Self {
            dimensions,
            vectors: HashMap::new(),
            fallback,
            failing_markers: Vec::new(),
            fail_initialize: false,
            embed_calls: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub(crate) fn failing_on(mut self, marker: &str) -> Self {
        self.failing_markers.push(marker.to_string());
        self
    }

    pub(crate) fn unloadable(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub(crate) fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeProvider {
    async fn initialize(&self) -> Result<()> {
        if self.fail_initialize {
            return Err(IndexError::ModelLoad("fake model unavailable".to_string()));
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn embed(&self, text: &str, options: EmbedOptions) -> Result<Vec<f32>> {
        self.initialize().await?;
        self.embed_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_markers.iter().any(|m| text.contains(m.as_str())) {
            return Err(IndexError::Embedding(format!("cannot embed '{}'", text)));
        }

        let mut vector = self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        if options.normalize {
            l2_normalize(&mut vector);
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        "fake-embedder"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// Ingestion module
// Pulls listings from an upstream source, normalizes and stores them, then
// embeds every stored service that has no vector yet

pub mod bazaar;


use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::database::sqlite::{Database, ServiceRecord, Source};
use crate::embeddings::{EMBED_BATCH_SIZE, EmbedOptions, EmbeddingProvider};
use crate::normalizer::{Normalizer, RawServiceRecord, extract_searchable_text, validate};
use crate::{IndexError, Result};

pub use bazaar::BazaarClient;

/// Producer of raw listings from one upstream directory
#[async_trait]
pub trait ServiceSource: Send + Sync {
    fn source(&self) -> Source;

    async fn fetch_records(&self) -> Result<Vec<RawServiceRecord>>;
}

/// Listings read from a JSON file: an array of either `{resource, manifest,
/// updatedAt}` records or bare listing items
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    source: Source,
}

impl JsonFileSource {
    #[inline]
    pub fn new(path: impl Into<PathBuf>, source: Source) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

#[async_trait]
impl ServiceSource for JsonFileSource {
    #[inline]
    fn source(&self) -> Source {
        self.source
    }

    #[inline]
    async fn fetch_records(&self) -> Result<Vec<RawServiceRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let items: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
            IndexError::Source(format!("Invalid listing file {}: {}", self.path.display(), e))
        })?;

        items
            .into_iter()
            .map(|item| {
                if item.get("manifest").is_some_and(Value::is_object) {
                    serde_json::from_value(item)
                        .map_err(|e| IndexError::Source(format!("Invalid listing record: {}", e)))
                } else {
                    Ok(RawServiceRecord::from_listing(item))
                }
            })
            .collect()
    }
}

/// Counters for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Raw listings received from the source
    pub fetched: usize,
    /// Services written to the store
    pub stored: usize,
    /// Normalized but rejected by validation
    pub invalid: usize,
    /// Could not be normalized at all
    pub failed: usize,
    pub embedded: usize,
    pub embedding_failures: usize,
}

impl IngestReport {
    fn merge_embedding(&mut self, other: Self) {
        self.embedded += other.embedded;
        self.embedding_failures += other.embedding_failures;
    }
}

pub struct Ingestor {
    database: Database,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    show_progress: bool,
}

impl Ingestor {
    #[inline]
    pub fn new(database: Database, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            database,
            provider,
            batch_size: EMBED_BATCH_SIZE,
            show_progress: console::user_attended_stderr(),
        }
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Fetch, normalize, validate and store every listing from `source`,
    /// then embed whatever is still missing a vector
    #[inline]
    pub async fn run(&self, source: &dyn ServiceSource) -> Result<IngestReport> {
        let start = Instant::now();
        info!("Starting ingestion from {}", source.source());

        let records = source.fetch_records().await?;
        let mut report = self
            .store_records(Normalizer::new(source.source()), &records)
            .await?;

        let embedding = self.embed_pending().await?;
        report.merge_embedding(embedding);

        info!(
            "Ingestion from {} finished in {}ms: {:?}",
            source.source(),
            start.elapsed().as_millis(),
            report
        );
        Ok(report)
    }

    /// Normalize and upsert raw listings. Records that fail normalization or
    /// validation are counted and skipped; storage errors abort the run.
    #[inline]
    pub async fn store_records(
        &self,
        normalizer: Normalizer,
        records: &[RawServiceRecord],
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            fetched: records.len(),
            ..IngestReport::default()
        };

        for raw in records {
            let service = match normalizer.normalize(raw) {
                Ok(service) => service,
                Err(e) => {
                    warn!("Skipping listing: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            if !validate(&service) {
                debug!("Rejected invalid service: {}", service.resource);
                report.invalid += 1;
                continue;
            }

            self.database.upsert_service(&service).await?;
            report.stored += 1;
        }

        info!(
            "Stored {} of {} listings ({} invalid, {} failed)",
            report.stored, report.fetched, report.invalid, report.failed
        );
        Ok(report)
    }

    /// Embed every stored service that has no vector yet.
    ///
    /// A chunk that fails as a whole is retried one text at a time so a
    /// single bad text only costs its own embedding.
    #[inline]
    pub async fn embed_pending(&self) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        let pending = self.database.list_services_without_embedding().await?;
        if pending.is_empty() {
            info!("All services already have embeddings");
            return Ok(report);
        }

        self.provider.initialize().await?;
        info!(
            "Generating embeddings for {} services with {}",
            pending.len(),
            self.provider.model()
        );

        let bar = if self.show_progress {
            ProgressBar::new(pending.len() as u64).with_style(
                ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        for chunk in pending.chunks(self.batch_size) {
            let vectors = self.embed_chunk(chunk).await;

            for (record, vector) in chunk.iter().zip(vectors) {
                let Some(vector) = vector else {
                    report.embedding_failures += 1;
                    continue;
                };

                match self
                    .database
                    .upsert_embedding(record.id, &vector, self.provider.dimensions())
                    .await
                {
                    Ok(()) => report.embedded += 1,
                    Err(e @ (IndexError::ForeignKey { .. } | IndexError::DimensionMismatch { .. })) => {
                        error!("Failed to store embedding for {}: {}", record.service.resource, e);
                        report.embedding_failures += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            bar.inc(chunk.len() as u64);
            bar.set_message(format!("({} failed)", report.embedding_failures));
        }

        bar.finish_and_clear();
        info!(
            "Embedded {} services ({} failures)",
            report.embedded, report.embedding_failures
        );
        Ok(report)
    }

    async fn embed_chunk(&self, chunk: &[ServiceRecord]) -> Vec<Option<Vec<f32>>> {
        let texts: Vec<String> = chunk
            .iter()
            .map(|record| extract_searchable_text(&record.service))
            .collect();

        match self.provider.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                return vectors.into_iter().map(Some).collect();
            }
            Ok(vectors) => warn!(
                "Embedding batch returned {} vectors for {} texts, retrying individually",
                vectors.len(),
                texts.len()
            ),
            Err(e) => warn!("Embedding batch failed ({}), retrying individually", e),
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for (record, text) in chunk.iter().zip(&texts) {
            match self.provider.embed(text, EmbedOptions::default()).await {
                Ok(vector) => vectors.push(Some(vector)),
                Err(e) => {
                    warn!("Failed to embed {}: {}", record.service.resource, e);
                    vectors.push(None);
                }
            }
        }
        vectors
    }
}

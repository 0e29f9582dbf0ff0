// Search module
// Query embedding, similarity scan, composite scoring and result caching

pub mod scoring;


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::database::sqlite::{Database, ServiceRecord, VectorMatch};
use crate::embeddings::{EmbedOptions, EmbeddingProvider};
use crate::{IndexError, Result};

pub use scoring::{InvalidWeight, ScoringPolicy};

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.3;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 900;
/// Candidates fetched per requested result, since ranking is not purely by similarity
const OVERFETCH_FACTOR: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_similarity: f64,
    pub use_cache: bool,
}

impl Default for SearchOptions {
    #[inline]
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            use_cache: true,
        }
    }
}

impl SearchOptions {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(IndexError::InvalidQuery(
                "limit must be at least 1".to_string(),
            ));
        }

        if !self.min_similarity.is_finite() || !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(IndexError::InvalidQuery(format!(
                "min_similarity must be within [0, 1], got {}",
                self.min_similarity
            )));
        }

        Ok(())
    }
}

/// A ranked result: the stored record plus the scores that placed it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: ServiceRecord,
    pub similarity_score: f64,
    pub final_score: f64,
    pub foundation_score: f64,
    pub semantic_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Deterministic cache key for a query and its parameters
#[inline]
pub fn cache_key(query: &str, options: &SearchOptions) -> String {
    format!(
        "search:{}:{}:{}",
        query, options.limit, options.min_similarity
    )
}

pub struct SearchEngine {
    database: Database,
    provider: Arc<dyn EmbeddingProvider>,
    policy: ScoringPolicy,
    cache_ttl_secs: u64,
}

impl SearchEngine {
    #[inline]
    pub fn new(database: Database, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            database,
            provider,
            policy: ScoringPolicy::default(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }

    #[inline]
    pub fn with_policy(mut self, policy: ScoringPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    pub fn with_cache_ttl(mut self, ttl_secs: u64) -> Self {
        self.cache_ttl_secs = ttl_secs;
        self
    }

    #[inline]
    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Rank stored services against `query`.
    ///
    /// An empty list means nothing matched; an error means the search could
    /// not be performed. Empty result sets are never cached.
    #[inline]
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(IndexError::InvalidQuery("query is empty".to_string()));
        }
        options.validate()?;

        let key = cache_key(query, &options);

        if options.use_cache {
            if let Some(hits) = self.database.cache_get::<Vec<SearchHit>>(&key).await? {
                debug!("Cache hit for query: {}", query);
                return Ok(hits);
            }
            debug!("Cache miss for query: {}", query);
        }

        let start = Instant::now();

        let query_vector = self
            .provider
            .embed(query, EmbedOptions::default())
            .await
            .map_err(|e| {
                warn!("Failed to embed query '{}': {}", query, e);
                IndexError::SearchUnavailable(e.to_string())
            })?;

        let candidates = self
            .database
            .vector_search(
                &query_vector,
                options.limit.saturating_mul(OVERFETCH_FACTOR),
                options.min_similarity,
            )
            .await?;

        debug!("Found {} candidates for '{}'", candidates.len(), query);

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|candidate| self.score(candidate))
            .collect();

        // Stable sort keeps scan order for ties
        hits.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        hits.truncate(options.limit);

        info!(
            "Search for '{}' completed in {}ms ({} results)",
            query,
            start.elapsed().as_millis(),
            hits.len()
        );

        if options.use_cache && !hits.is_empty() {
            self.database
                .cache_set(&key, &hits, self.cache_ttl_secs)
                .await?;
        }

        Ok(hits)
    }

    /// [`Self::search`] wrapped in the envelope returned to API consumers
    #[inline]
    pub async fn search_response(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<SearchResponse> {
        let results = self.search(query, options).await?;
        let count = results.len();

        Ok(SearchResponse {
            query: query.to_string(),
            results,
            count,
            timestamp: Utc::now(),
        })
    }

    fn score(&self, candidate: VectorMatch) -> SearchHit {
        let foundation_score = self.policy.foundation_score(&candidate.record);
        let semantic_score = candidate.similarity;
        let final_score = self.policy.final_score(foundation_score, semantic_score);

        SearchHit {
            record: candidate.record,
            similarity_score: candidate.similarity,
            final_score,
            foundation_score,
            semantic_score,
        }
    }
}

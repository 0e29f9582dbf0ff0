#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream aggregator a record was sourced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Bazaar,
    X402scan,
    Xgate,
}

impl std::fmt::Display for Source {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Source::Bazaar => write!(f, "bazaar"),
            Source::X402scan => write!(f, "x402scan"),
            Source::Xgate => write!(f, "xgate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceFlags {
    #[serde(rename = "source_bazaar")]
    pub bazaar: bool,
    #[serde(rename = "source_x402scan")]
    pub x402scan: bool,
    #[serde(rename = "source_xgate")]
    pub xgate: bool,
}

impl SourceFlags {
    #[inline]
    pub fn only(source: Source) -> Self {
        let mut flags = Self::default();
        match source {
            Source::Bazaar => flags.bazaar = true,
            Source::X402scan => flags.x402scan = true,
            Source::Xgate => flags.xgate = true,
        }
        flags
    }

    #[inline]
    pub fn contains(&self, source: Source) -> bool {
        match source {
            Source::Bazaar => self.bazaar,
            Source::X402scan => self.x402scan,
            Source::Xgate => self.xgate,
        }
    }
}

/// Every mutable column of a service, as produced by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewService {
    pub resource: String,
    pub description: String,
    pub network: String,
    pub asset: String,
    pub max_amount: i64,
    pub pay_to: String,
    pub manifest: serde_json::Value,

    pub trust_transaction_count: i64,
    pub trust_last_seen: Option<DateTime<Utc>>,
    pub trust_origin_title: Option<String>,
    pub trust_origin_description: Option<String>,

    pub score_confidence: f64,
    pub score_performance_ms: Option<i64>,
    pub score_reliability: f64,
    pub score_popularity: i64,
    pub score_unique_users: i64,

    #[serde(flatten)]
    pub sources: SourceFlags,

    pub last_updated: DateTime<Utc>,
}

/// A stored service with its surrogate key and store-managed timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    #[serde(flatten)]
    pub service: NewService,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub service_id: i64,
    pub vector: Vec<f32>,
    pub dimensions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub record: ServiceRecord,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub expiry: i64,
}

impl CacheEntry {
    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expiry
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub services: i64,
    pub embeddings: i64,
    pub db_size_bytes: i64,
    pub cache_pruned: u64,
}

impl StoreStats {
    #[inline]
    pub fn db_size_mb(&self) -> f64 {
        self.db_size_bytes as f64 / 1024.0 / 1024.0
    }

    #[inline]
    pub fn missing_embeddings(&self) -> i64 {
        (self.services - self.embeddings).max(0)
    }
}

impl ServiceRecord {
    #[inline]
    pub fn has_origin_title(&self) -> bool {
        self.service
            .trust_origin_title
            .as_deref()
            .is_some_and(|title| !title.is_empty())
    }
}

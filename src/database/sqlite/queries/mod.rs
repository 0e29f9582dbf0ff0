
use super::models::*;
use crate::embeddings::similarity::cosine_similarity;
use crate::{IndexError, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, error};

/// Attach a message to a sqlx failure and surface it as a storage error
pub(crate) trait StorageContext<T> {
    fn storage(self, message: &str) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, sqlx::Error> {
    #[inline]
    fn storage(self, message: &str) -> Result<T> {
        self.map_err(|e| IndexError::Storage(format!("{}: {}", message, e)))
    }
}

const SERVICE_COLUMNS: &str = r#"
    s.id AS id,
    s.resource AS resource,
    s.description AS description,
    s.network AS network,
    s.asset AS asset,
    s.max_amount AS max_amount,
    s.pay_to AS pay_to,
    s.manifest AS manifest,
    s.trust_transaction_count AS trust_transaction_count,
    s.trust_last_seen AS trust_last_seen,
    s.trust_origin_title AS trust_origin_title,
    s.trust_origin_description AS trust_origin_description,
    s.score_confidence AS score_confidence,
    s.score_performance_ms AS score_performance_ms,
    s.score_reliability AS score_reliability,
    s.score_popularity AS score_popularity,
    s.score_unique_users AS score_unique_users,
    s.source_bazaar AS source_bazaar,
    s.source_x402scan AS source_x402scan,
    s.source_xgate AS source_xgate,
    s.last_updated AS last_updated,
    s.created_at AS created_at,
    s.updated_at AS updated_at
"#;

fn timestamp(secs: i64, column: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        IndexError::Storage(format!("Invalid timestamp {} in column {}", secs, column))
    })
}

fn service_from_row(row: &SqliteRow) -> Result<ServiceRecord> {
    let id: i64 = row.try_get("id").storage("Failed to read service id")?;
    let manifest_text: String = row
        .try_get("manifest")
        .storage("Failed to read service manifest")?;
    let manifest = serde_json::from_str(&manifest_text).map_err(|e| {
        IndexError::Storage(format!("Corrupt manifest for service {}: {}", id, e))
    })?;

    let trust_last_seen: Option<i64> = row
        .try_get("trust_last_seen")
        .storage("Failed to read trust_last_seen")?;
    let trust_last_seen = trust_last_seen
        .map(|secs| timestamp(secs, "trust_last_seen"))
        .transpose()?;

    let flag = |column: &str| -> Result<bool> {
        let value: i64 = row.try_get(column).storage("Failed to read source flag")?;
        Ok(value != 0)
    };

    let service = NewService {
        resource: row.try_get("resource").storage("Failed to read resource")?,
        description: row
            .try_get("description")
            .storage("Failed to read description")?,
        network: row.try_get("network").storage("Failed to read network")?,
        asset: row.try_get("asset").storage("Failed to read asset")?,
        max_amount: row.try_get("max_amount").storage("Failed to read max_amount")?,
        pay_to: row.try_get("pay_to").storage("Failed to read pay_to")?,
        manifest,
        trust_transaction_count: row
            .try_get("trust_transaction_count")
            .storage("Failed to read trust_transaction_count")?,
        trust_last_seen,
        trust_origin_title: row
            .try_get("trust_origin_title")
            .storage("Failed to read trust_origin_title")?,
        trust_origin_description: row
            .try_get("trust_origin_description")
            .storage("Failed to read trust_origin_description")?,
        score_confidence: row
            .try_get("score_confidence")
            .storage("Failed to read score_confidence")?,
        score_performance_ms: row
            .try_get("score_performance_ms")
            .storage("Failed to read score_performance_ms")?,
        score_reliability: row
            .try_get("score_reliability")
            .storage("Failed to read score_reliability")?,
        score_popularity: row
            .try_get("score_popularity")
            .storage("Failed to read score_popularity")?,
        score_unique_users: row
            .try_get("score_unique_users")
            .storage("Failed to read score_unique_users")?,
        sources: SourceFlags {
            bazaar: flag("source_bazaar")?,
            x402scan: flag("source_x402scan")?,
            xgate: flag("source_xgate")?,
        },
        last_updated: timestamp(
            row.try_get("last_updated")
                .storage("Failed to read last_updated")?,
            "last_updated",
        )?,
    };

    Ok(ServiceRecord {
        id,
        service,
        created_at: timestamp(
            row.try_get("created_at")
                .storage("Failed to read created_at")?,
            "created_at",
        )?,
        updated_at: timestamp(
            row.try_get("updated_at")
                .storage("Failed to read updated_at")?,
            "updated_at",
        )?,
    })
}

pub struct ServiceQueries;

impl ServiceQueries {
    /// Insert or replace keyed by `resource`. Every mutable column takes the
    /// incoming value (source flags included); the row id never changes.
    #[inline]
    pub async fn upsert(pool: &SqlitePool, service: &NewService) -> Result<i64> {
        let now = Utc::now().timestamp();
        let manifest = serde_json::to_string(&service.manifest)
            .map_err(|e| IndexError::Validation(format!("Unserializable manifest: {}", e)))?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO services (
                resource, description, network, asset, max_amount, pay_to, manifest,
                trust_transaction_count, trust_last_seen, trust_origin_title, trust_origin_description,
                score_confidence, score_performance_ms, score_reliability, score_popularity,
                score_unique_users, source_bazaar, source_x402scan, source_xgate,
                last_updated, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource) DO UPDATE SET
                description = excluded.description,
                network = excluded.network,
                asset = excluded.asset,
                max_amount = excluded.max_amount,
                pay_to = excluded.pay_to,
                manifest = excluded.manifest,
                trust_transaction_count = excluded.trust_transaction_count,
                trust_last_seen = excluded.trust_last_seen,
                trust_origin_title = excluded.trust_origin_title,
                trust_origin_description = excluded.trust_origin_description,
                score_confidence = excluded.score_confidence,
                score_performance_ms = excluded.score_performance_ms,
                score_reliability = excluded.score_reliability,
                score_popularity = excluded.score_popularity,
                score_unique_users = excluded.score_unique_users,
                source_bazaar = excluded.source_bazaar,
                source_x402scan = excluded.source_x402scan,
                source_xgate = excluded.source_xgate,
                last_updated = excluded.last_updated,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&service.resource)
        .bind(&service.description)
        .bind(&service.network)
        .bind(&service.asset)
        .bind(service.max_amount)
        .bind(&service.pay_to)
        .bind(manifest)
        .bind(service.trust_transaction_count)
        .bind(service.trust_last_seen.map(|t| t.timestamp()))
        .bind(&service.trust_origin_title)
        .bind(&service.trust_origin_description)
        .bind(service.score_confidence)
        .bind(service.score_performance_ms)
        .bind(service.score_reliability)
        .bind(service.score_popularity)
        .bind(service.score_unique_users)
        .bind(i64::from(service.sources.bazaar))
        .bind(i64::from(service.sources.x402scan))
        .bind(i64::from(service.sources.xgate))
        .bind(service.last_updated.timestamp())
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .storage("Failed to upsert service")?;

        debug!("Upserted service {} as id {}", service.resource, id);
        Ok(id)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ServiceRecord>> {
        let query = format!("SELECT {} FROM services s WHERE s.id = ?", SERVICE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .storage("Failed to get service by id")?;

        row.as_ref().map(service_from_row).transpose()
    }

    #[inline]
    pub async fn get_by_resource(
        pool: &SqlitePool,
        resource: &str,
    ) -> Result<Option<ServiceRecord>> {
        let query = format!(
            "SELECT {} FROM services s WHERE s.resource = ?",
            SERVICE_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(resource)
            .fetch_optional(pool)
            .await
            .storage("Failed to get service by resource")?;

        row.as_ref().map(service_from_row).transpose()
    }

    /// Most recently updated upstream first
    #[inline]
    pub async fn list_all(pool: &SqlitePool, limit: Option<u32>) -> Result<Vec<ServiceRecord>> {
        let query = format!(
            "SELECT {} FROM services s ORDER BY s.last_updated DESC, s.id ASC LIMIT ?",
            SERVICE_COLUMNS
        );
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, i64::from);
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
            .storage("Failed to list services")?;

        rows.iter().map(service_from_row).collect()
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM services")
            .fetch_one(pool)
            .await
            .storage("Failed to count services")
    }

    #[inline]
    pub async fn list_without_embedding(pool: &SqlitePool) -> Result<Vec<ServiceRecord>> {
        let query = format!(
            r#"
            SELECT {} FROM services s
            LEFT JOIN embeddings e ON s.id = e.service_id
            WHERE e.service_id IS NULL
            ORDER BY s.id ASC
            "#,
            SERVICE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(pool)
            .await
            .storage("Failed to list services without embeddings")?;

        rows.iter().map(service_from_row).collect()
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .storage("Failed to delete service")?;

        Ok(result.rows_affected() > 0)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    if blob.len() != dimensions * 4 {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            found: blob.len() / 4,
        });
    }

    Ok(blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}

fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    error.as_database_error().is_some_and(|db_error| {
        db_error.is_foreign_key_violation()
            || db_error.message().contains("FOREIGN KEY constraint failed")
    })
}

fn dimensions_from_row(row: &SqliteRow) -> Result<usize> {
    let dimensions: i64 = row
        .try_get("dimensions")
        .storage("Failed to read embedding dimensions")?;
    usize::try_from(dimensions)
        .map_err(|_| IndexError::Storage(format!("Invalid embedding dimensions: {}", dimensions)))
}

pub struct EmbeddingQueries;

impl EmbeddingQueries {
    /// Insert or replace keyed by `service_id`. The owning service must exist.
    #[inline]
    pub async fn upsert(
        pool: &SqlitePool,
        service_id: i64,
        vector: &[f32],
        dimensions: usize,
    ) -> Result<()> {
        if vector.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                found: vector.len(),
            });
        }

        let dimensions = i64::try_from(dimensions)
            .map_err(|_| IndexError::Validation(format!("Too many dimensions: {}", dimensions)))?;

        sqlx::query(
            r#"
            INSERT INTO embeddings (service_id, embedding, dimensions, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(service_id) DO UPDATE SET
                embedding = excluded.embedding,
                dimensions = excluded.dimensions,
                created_at = excluded.created_at
            "#,
        )
        .bind(service_id)
        .bind(encode_vector(vector))
        .bind(dimensions)
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                error!("Embedding write for unknown service {}", service_id);
                IndexError::ForeignKey { service_id }
            } else {
                IndexError::Storage(format!("Failed to upsert embedding: {}", e))
            }
        })?;

        Ok(())
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, service_id: i64) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query("SELECT embedding, dimensions FROM embeddings WHERE service_id = ?")
            .bind(service_id)
            .fetch_optional(pool)
            .await
            .storage("Failed to get embedding")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let blob: Vec<u8> = row.try_get("embedding").storage("Failed to read embedding")?;
        decode_vector(&blob, dimensions_from_row(&row)?).map(Some)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(pool)
            .await
            .storage("Failed to count embeddings")
    }

    /// Brute-force cosine scan over every stored embedding.
    ///
    /// Rows are scanned in ascending service id and the sort is stable, so
    /// equal similarities keep id order.
    #[inline]
    pub async fn vector_search(
        pool: &SqlitePool,
        query_vector: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<VectorMatch>> {
        let query = format!(
            r#"
            SELECT {}, e.embedding, e.dimensions
            FROM services s
            JOIN embeddings e ON s.id = e.service_id
            ORDER BY s.id ASC
            "#,
            SERVICE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(pool)
            .await
            .storage("Failed to load embeddings for vector search")?;

        debug!("Scanning {} embeddings", rows.len());

        let mut matches = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").storage("Failed to read embedding")?;
            let vector = decode_vector(&blob, dimensions_from_row(row)?)?;

            let similarity = cosine_similarity(query_vector, &vector).inspect_err(|e| {
                error!("Stored embedding is incompatible with the query vector: {}", e);
            })?;

            if similarity < min_similarity {
                continue;
            }

            matches.push(VectorMatch {
                record: service_from_row(row)?,
                similarity,
            });
        }

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(limit);

        Ok(matches)
    }
}

pub struct CacheQueries;

impl CacheQueries {
    /// Look up `key` as of `now` (unix seconds). Expired entries are deleted
    /// and reported as absent.
    #[inline]
    pub async fn get(pool: &SqlitePool, key: &str, now: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, expiry FROM cache WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await
            .storage("Failed to read cache entry")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let entry = CacheEntry {
            key: key.to_string(),
            value: row.try_get("value").storage("Failed to read cache value")?,
            expiry: row.try_get("expiry").storage("Failed to read cache expiry")?,
        };

        if entry.is_expired(now) {
            debug!("Cache entry {} expired at {}", key, entry.expiry);
            Self::delete(pool, key).await?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    #[inline]
    pub async fn set(
        pool: &SqlitePool,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        now: i64,
    ) -> Result<()> {
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let expiry = now.saturating_add(ttl);

        sqlx::query(
            r#"
            INSERT INTO cache (key, value, expiry)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expiry = excluded.expiry
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry)
        .execute(pool)
        .await
        .storage("Failed to write cache entry")?;

        Ok(())
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(pool)
            .await
            .storage("Failed to delete cache entry")?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove every entry that expired before `now`
    #[inline]
    pub async fn prune(pool: &SqlitePool, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache WHERE expiry < ?")
            .bind(now)
            .execute(pool)
            .await
            .storage("Failed to prune cache")?;

        let pruned = result.rows_affected();
        debug!("Pruned {} expired cache entries", pruned);
        Ok(pruned)
    }
}

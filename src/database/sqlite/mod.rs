use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::{IndexError, Result};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub use models::{
    CacheEntry, EmbeddingVector, NewService, ServiceRecord, Source, SourceFlags, StoreStats,
    VectorMatch,
};
pub use queries::{CacheQueries, EmbeddingQueries, ServiceQueries};

use queries::StorageContext;

pub type DbPool = Pool<Sqlite>;

/// Handle to the record store. Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .storage("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to run schema migration: {}", e)))?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir)?;
        Self::new(config_dir.join("services.db")).await
    }

    // Service operations
    #[inline]
    pub async fn upsert_service(&self, service: &NewService) -> Result<i64> {
        ServiceQueries::upsert(&self.pool, service).await
    }

    #[inline]
    pub async fn get_service_by_id(&self, id: i64) -> Result<Option<ServiceRecord>> {
        ServiceQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn get_service_by_resource(&self, resource: &str) -> Result<Option<ServiceRecord>> {
        ServiceQueries::get_by_resource(&self.pool, resource).await
    }

    #[inline]
    pub async fn list_services(&self, limit: Option<u32>) -> Result<Vec<ServiceRecord>> {
        ServiceQueries::list_all(&self.pool, limit).await
    }

    #[inline]
    pub async fn count_services(&self) -> Result<i64> {
        ServiceQueries::count(&self.pool).await
    }

    #[inline]
    pub async fn list_services_without_embedding(&self) -> Result<Vec<ServiceRecord>> {
        ServiceQueries::list_without_embedding(&self.pool).await
    }

    #[inline]
    pub async fn delete_service(&self, id: i64) -> Result<bool> {
        ServiceQueries::delete(&self.pool, id).await
    }

    // Embedding operations
    #[inline]
    pub async fn upsert_embedding(
        &self,
        service_id: i64,
        vector: &[f32],
        dimensions: usize,
    ) -> Result<()> {
        EmbeddingQueries::upsert(&self.pool, service_id, vector, dimensions).await
    }

    #[inline]
    pub async fn get_embedding(&self, service_id: i64) -> Result<Option<Vec<f32>>> {
        EmbeddingQueries::get(&self.pool, service_id).await
    }

    #[inline]
    pub async fn count_embeddings(&self) -> Result<i64> {
        EmbeddingQueries::count(&self.pool).await
    }

    #[inline]
    pub async fn vector_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<VectorMatch>> {
        EmbeddingQueries::vector_search(&self.pool, query_vector, limit, min_similarity).await
    }

    // Cache operations
    /// Fetch a cached value. Expired or unreadable entries read as absent.
    #[inline]
    pub async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = CacheQueries::get(&self.pool, key, now()).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", key, e);
                CacheQueries::delete(&self.pool, key).await?;
                Ok(None)
            }
        }
    }

    #[inline]
    pub async fn cache_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| IndexError::Validation(format!("Unserializable cache value: {}", e)))?;
        CacheQueries::set(&self.pool, key, &raw, ttl_seconds, now()).await
    }

    #[inline]
    pub async fn cache_delete(&self, key: &str) -> Result<bool> {
        CacheQueries::delete(&self.pool, key).await
    }

    #[inline]
    pub async fn cache_prune(&self) -> Result<u64> {
        CacheQueries::prune(&self.pool, now()).await
    }

    /// Size of the database file in bytes
    #[inline]
    pub async fn db_size(&self) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await
        .storage("Failed to read database size")
    }

    /// Counts for status reporting. Prunes expired cache entries as a side effect.
    #[inline]
    pub async fn stats(&self) -> Result<StoreStats> {
        let cache_pruned = self.cache_prune().await?;

        Ok(StoreStats {
            services: self.count_services().await?,
            embeddings: self.count_embeddings().await?,
            db_size_bytes: self.db_size().await?,
            cache_pruned,
        })
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .storage("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .storage("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

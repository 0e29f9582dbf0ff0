use anyhow::{Context, Result, bail};
use itertools::Itertools;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::ErrorKind;
use crate::config::Config;
use crate::database::sqlite::{Database, ServiceRecord, Source};
use crate::embeddings::{EmbeddingProvider, OllamaProvider};
use crate::ingest::{BazaarClient, IngestReport, Ingestor, JsonFileSource, ServiceSource};
use crate::search::{SearchEngine, SearchOptions};

async fn open_database(config: &Config) -> Result<Database> {
    Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .with_context(|| {
            format!(
                "Failed to initialize database at {}",
                config.database_path().display()
            )
        })
}

fn embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider =
        OllamaProvider::new(&config.ollama).context("Failed to create embedding provider")?;
    Ok(Arc::new(provider))
}

/// Search options from CLI overrides and the `[search]` section. The limit
/// is capped at `max_limit`.
#[inline]
pub fn search_options(
    config: &Config,
    limit: Option<usize>,
    min_similarity: Option<f64>,
    no_cache: bool,
) -> SearchOptions {
    let max_limit = config.search.max_limit as usize;
    SearchOptions {
        limit: limit
            .unwrap_or(config.search.default_limit as usize)
            .min(max_limit),
        min_similarity: min_similarity.unwrap_or(config.search.min_similarity),
        use_cache: !no_cache,
    }
}

fn source_names(record: &ServiceRecord) -> String {
    [Source::Bazaar, Source::X402scan, Source::Xgate]
        .into_iter()
        .filter(|source| record.service.sources.contains(*source))
        .join(", ")
}

fn print_report(report: &IngestReport) {
    println!("Ingestion complete:");
    println!("  Fetched: {}", report.fetched);
    println!("  Stored: {}", report.stored);
    println!("  Invalid: {}", report.invalid);
    println!("  Failed to normalize: {}", report.failed);
    println!("  Embedded: {}", report.embedded);
    if report.embedding_failures > 0 {
        println!("  ⚠️  Embedding failures: {}", report.embedding_failures);
    }
}

/// Pull listings from Bazaar, or from a JSON file, then embed new services
#[inline]
pub async fn ingest(config: &Config, file: Option<PathBuf>, source: Source) -> Result<()> {
    let database = open_database(config).await?;
    let ingestor = Ingestor::new(database, embedding_provider(config)?)
        .with_batch_size(config.ollama.batch_size as usize);

    let upstream: Box<dyn ServiceSource> = match file {
        Some(path) => {
            info!("Ingesting {} listings from {}", source, path.display());
            Box::new(JsonFileSource::new(path, source))
        }
        None => Box::new(BazaarClient::new(&config.bazaar)?),
    };

    let report = ingestor
        .run(upstream.as_ref())
        .await
        .context("Ingestion failed")?;
    print_report(&report);
    Ok(())
}

/// Embed every stored service that has no vector yet
#[inline]
pub async fn embed_missing(config: &Config) -> Result<()> {
    let database = open_database(config).await?;
    let ingestor = Ingestor::new(database, embedding_provider(config)?)
        .with_batch_size(config.ollama.batch_size as usize);

    let report = ingestor
        .embed_pending()
        .await
        .context("Embedding failed")?;

    println!("Embedded {} services", report.embedded);
    if report.embedding_failures > 0 {
        println!("⚠️  {} services could not be embedded", report.embedding_failures);
    }
    Ok(())
}

#[inline]
pub async fn search(config: &Config, query: &str, options: SearchOptions, json: bool) -> Result<()> {
    let database = open_database(config).await?;
    let engine = SearchEngine::new(database, embedding_provider(config)?)
        .with_policy(config.scoring)
        .with_cache_ttl(config.search.cache_ttl_secs);

    let response = match engine.search_response(query, options).await {
        Ok(response) => response,
        Err(e) if e.kind() == ErrorKind::Unavailable => {
            return Err(anyhow::Error::new(e).context(format!(
                "Search needs the {} model served by Ollama at {}:{}",
                config.ollama.model, config.ollama.host, config.ollama.port
            )));
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No services matched '{}'.", query);
        return Ok(());
    }

    println!("Results for '{}' ({}):", query, response.count);
    println!();

    for (rank, hit) in response.results.iter().enumerate() {
        let service = &hit.record.service;
        let title = service
            .trust_origin_title
            .as_deref()
            .unwrap_or(service.resource.as_str());

        println!("{}. {} (ID: {})", rank + 1, title, hit.record.id);
        println!("   URL: {}", service.resource);
        println!("   {}", service.description);
        println!(
            "   Price: {} {} on {}",
            service.max_amount, service.asset, service.network
        );
        println!(
            "   Score: {:.3} (similarity {:.3}, foundation {:.3})",
            hit.final_score, hit.similarity_score, hit.foundation_score
        );
        println!();
    }

    Ok(())
}

#[inline]
pub async fn list_services(config: &Config, limit: Option<u32>) -> Result<()> {
    let database = open_database(config).await?;
    let services = database
        .list_services(limit)
        .await
        .context("Failed to list services")?;

    if services.is_empty() {
        println!("No services have been ingested yet.");
        println!("Use 'x402-search ingest' to fetch listings.");
        return Ok(());
    }

    let total = database.count_services().await?;
    println!("Services ({} of {}):", services.len(), total);
    println!();

    for record in &services {
        println!("{} (ID: {})", record.service.resource, record.id);
        println!("   {}", record.service.description);
        println!(
            "   Network: {}  Asset: {}  Sources: {}",
            record.service.network,
            record.service.asset,
            source_names(record)
        );
    }

    Ok(())
}

#[inline]
pub async fn show_service(config: &Config, id: i64) -> Result<()> {
    let database = open_database(config).await?;
    let Some(record) = database.get_service_by_id(id).await? else {
        bail!("Service not found: {}", id);
    };
    let has_embedding = database.get_embedding(id).await?.is_some();
    let service = &record.service;

    println!("{} (ID: {})", service.resource, record.id);
    if let Some(title) = &service.trust_origin_title {
        println!("  Title: {}", title);
    }
    println!("  Description: {}", service.description);
    println!("  Network: {}", service.network);
    println!("  Asset: {}", service.asset);
    println!("  Max amount: {}", service.max_amount);
    println!("  Pay to: {}", service.pay_to);
    println!("  Sources: {}", source_names(&record));
    println!("  Transactions: {}", service.trust_transaction_count);
    println!("  Unique users: {}", service.score_unique_users);
    println!("  Confidence: {:.2}", service.score_confidence);
    println!("  Reliability: {:.2}", service.score_reliability);
    if let Some(latency) = service.score_performance_ms {
        println!("  Avg latency: {}ms", latency);
    }
    println!(
        "  Embedded: {}",
        if has_embedding { "yes" } else { "no" }
    );
    println!(
        "  Last updated: {}",
        service.last_updated.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Stored: {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    Ok(())
}

#[inline]
pub async fn delete_service(config: &Config, id: i64) -> Result<()> {
    let database = open_database(config).await?;
    let Some(record) = database.get_service_by_id(id).await? else {
        bail!("Service not found: {}", id);
    };

    if database.delete_service(id).await? {
        println!(
            "Deleted service {} (ID: {}) and its embedding",
            record.service.resource, id
        );
    }
    Ok(())
}

/// Store counts; expired cache entries are pruned along the way
#[inline]
pub async fn show_stats(config: &Config) -> Result<()> {
    let database = open_database(config).await?;
    let stats = database.stats().await.context("Failed to read statistics")?;

    println!("Database: {}", config.database_path().display());
    println!("  Services: {}", stats.services);
    println!("  Embeddings: {}", stats.embeddings);
    if stats.missing_embeddings() > 0 {
        println!(
            "  Missing embeddings: {} (run 'x402-search embed')",
            stats.missing_embeddings()
        );
    }
    println!("  Size: {:.2} MB", stats.db_size_mb());
    println!("  Expired cache entries pruned: {}", stats.cache_pruned);
    println!("  Embedding model: {}", config.ollama.model);

    Ok(())
}

#[inline]
pub async fn prune_cache(config: &Config) -> Result<()> {
    let database = open_database(config).await?;
    let pruned = database.cache_prune().await?;
    database.optimize().await?;
    println!("Removed {} expired cache entries", pruned);
    Ok(())
}

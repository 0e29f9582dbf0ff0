use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use x402_search::Result;
use x402_search::commands::{
    delete_service, embed_missing, ingest, list_services, prune_cache, search, search_options,
    show_service, show_stats,
};
use x402_search::config::{Config, run_interactive_config, show_config};
use x402_search::database::Source;

#[derive(Parser)]
#[command(name = "x402-search")]
#[command(about = "Semantic search over x402 paid-API service listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    Bazaar,
    X402scan,
    Xgate,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Bazaar => Source::Bazaar,
            SourceArg::X402scan => Source::X402scan,
            SourceArg::Xgate => Source::Xgate,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama, search, scoring and upstream settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Fetch listings, store them and embed new services
    Ingest {
        /// Read listings from a JSON file instead of the Bazaar API
        #[arg(long)]
        file: Option<PathBuf>,
        /// Upstream the listings in --file came from
        #[arg(long, value_enum, default_value = "bazaar", requires = "file")]
        source: SourceArg,
    },
    /// Embed stored services that have no vector yet
    Embed,
    /// Search services by natural-language query
    Search {
        query: String,
        /// Maximum number of results
        #[arg(long, short)]
        limit: Option<usize>,
        /// Minimum cosine similarity, between 0 and 1
        #[arg(long)]
        min_similarity: Option<f64>,
        /// Skip the result cache
        #[arg(long)]
        no_cache: bool,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored services
    List {
        #[arg(long, short)]
        limit: Option<u32>,
    },
    /// Show one stored service
    Show { id: i64 },
    /// Delete a service and its embedding
    Delete { id: i64 },
    /// Show store statistics
    Stats,
    /// Remove expired cache entries and compact the database
    PruneCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Config { show } = cli.command {
        if show {
            show_config()?;
        } else {
            run_interactive_config()?;
        }
        return Ok(());
    }

    let config = Config::load_default()?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Ingest { file, source } => {
            ingest(&config, file, source.into()).await?;
        }
        Commands::Embed => {
            embed_missing(&config).await?;
        }
        Commands::Search {
            query,
            limit,
            min_similarity,
            no_cache,
            json,
        } => {
            let options = search_options(&config, limit, min_similarity, no_cache);
            search(&config, &query, options, json).await?;
        }
        Commands::List { limit } => {
            list_services(&config, limit).await?;
        }
        Commands::Show { id } => {
            show_service(&config, id).await?;
        }
        Commands::Delete { id } => {
            delete_service(&config, id).await?;
        }
        Commands::Stats => {
            show_stats(&config).await?;
        }
        Commands::PruneCache => {
            prune_cache(&config).await?;
        }
    }

    Ok(())
}

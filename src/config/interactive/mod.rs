
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{BazaarConfig, Config, ConfigError, OllamaConfig, SearchConfig};

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 x402 Search Configuration Setup").bold().cyan());
    eprintln!();

    let config_dir = Config::config_dir().context("Failed to resolve config directory")?;
    let mut config = load_existing_config(&config_dir);

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure your local Ollama instance for embedding generation.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Search Configuration").bold().yellow());
    configure_search(&mut config.search)?;

    eprintln!();
    eprintln!("{}", style("Bazaar Configuration").bold().yellow());
    configure_bazaar(&mut config.bazaar)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before embedding.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Dimensions: {}", style(config.ollama.embedding_dimension).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Search Settings:").bold().yellow());
    eprintln!("  Default Limit: {}", style(config.search.default_limit).cyan());
    eprintln!("  Max Limit: {}", style(config.search.max_limit).cyan());
    eprintln!("  Min Similarity: {}", style(config.search.min_similarity).cyan());
    eprintln!("  Cache TTL: {}s", style(config.search.cache_ttl_secs).cyan());

    eprintln!();
    eprintln!("{}", style("Scoring Policy:").bold().yellow());
    let scoring = &config.scoring;
    eprintln!("  Base: {}", style(scoring.base).cyan());
    eprintln!(
        "  Description Bonus: {} (> {} chars)",
        style(scoring.description_bonus).cyan(),
        scoring.description_min_chars
    );
    eprintln!("  Origin Title Bonus: {}", style(scoring.origin_title_bonus).cyan());
    eprintln!("  Accepts Bonus: {}", style(scoring.accepts_bonus).cyan());
    eprintln!(
        "  Weights: foundation {} / similarity {}",
        style(scoring.foundation_weight).cyan(),
        style(scoring.similarity_weight).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Bazaar Settings:").bold().yellow());
    eprintln!("  URL: {}", style(&config.bazaar.base_url).cyan());
    eprintln!(
        "  Pages: {} x {}",
        style(config.bazaar.max_pages).cyan(),
        style(config.bazaar.page_size).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!("Database: {}", style(config.database_path().display()).dim());

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_dimension: u32 = Input::new()
        .with_prompt("Embedding dimensions")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimensions must be between 64 and 4096")
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embedding_dimension(embedding_dimension)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_search(search: &mut SearchConfig) -> Result<()> {
    let min_similarity: f64 = Input::new()
        .with_prompt("Minimum similarity (0.0 - 1.0)")
        .default(search.min_similarity)
        .validate_with(|input: &f64| -> Result<(), &str> {
            if input.is_finite() && (0.0..=1.0).contains(input) {
                Ok(())
            } else {
                Err("Similarity must be between 0 and 1")
            }
        })
        .interact_text()?;

    let cache_ttl_secs: u64 = Input::new()
        .with_prompt("Search cache TTL (seconds)")
        .default(search.cache_ttl_secs)
        .interact_text()?;

    search.set_min_similarity(min_similarity)?;
    search.cache_ttl_secs = cache_ttl_secs;

    Ok(())
}

fn configure_bazaar(bazaar: &mut BazaarConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("Bazaar API base URL")
        .default(bazaar.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = BazaarConfig {
                base_url: input.clone(),
                ..BazaarConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    bazaar.set_base_url(base_url)?;

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}

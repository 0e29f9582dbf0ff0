// Configuration management module
// TOML settings plus the interactive editor behind `x402-search config`

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{BazaarConfig, Config, ConfigError, OllamaConfig, SearchConfig};


//! Configuration loading.
//!
//! Sources, lowest precedence first:
//! 1. Defaults in code
//! 2. `config/{environment}` file (toml/yaml/json, optional)
//! 3. `.env` file, then environment variables with the `STOCKROOM_` prefix
//!    (`STOCKROOM_DATABASE__URL`, `STOCKROOM_LOGGING__JSON`, ...)

use config::{ConfigError, Environment, File};
use serde::Deserialize;

pub use stockroom_observability::LoggingConfig;

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StockroomConfig {
    /// development, production, ...
    pub environment: String,

    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    pub max_connections: u32,

    pub min_connections: u32,

    /// Seconds to wait for a pooled connection.
    pub acquire_timeout_secs: u64,
}

impl StockroomConfig {
    /// Load configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let environment = std::env::var("STOCKROOM_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        Self::builder(&environment)?
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(
                Environment::with_prefix("STOCKROOM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    fn builder(
        environment: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("environment", environment)?
            .set_default("database.url", "postgres://localhost:5432/stockroom")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("logging.filter", "info")?
            .set_default("logging.json", true)
    }
}

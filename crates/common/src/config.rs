//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Vote transaction configuration.
    #[serde(default)]
    pub voting: VotingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Vote transaction configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// Whole-transaction retries after a `ConcurrentModification`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between consistency sweeps. `0` disables the sweep.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Targets examined per sweep batch.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: u64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            scan_interval_secs: default_scan_interval_secs(),
            scan_batch_size: default_scan_batch_size(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_scan_interval_secs() -> u64 {
    300
}

const fn default_scan_batch_size() -> u64 {
    100
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present, exported into the process environment)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `QNA_ENV`)
    /// 4. Environment variables with `QNA_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("QNA_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("QNA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("QNA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

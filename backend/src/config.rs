//! Configuration management for the lot pipeline server
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with LOTLINE_ prefix

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Rendered document cache
    pub artifacts: ArtifactConfig,

    /// Dashboard alert thresholds
    pub dashboard: DashboardConfig,

    /// List paging limits
    pub pagination: PaginationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,

    /// Upper bound on any row-lock wait, in milliseconds
    pub lock_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactConfig {
    /// Directory holding cached PDFs
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct DashboardConfig {
    pub no_qc_hours: i64,
    pub missing_net_weight_hours: i64,
    pub no_fumigation_hours: i64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            no_qc_hours: 24,
            missing_net_weight_hours: 12,
            no_fumigation_hours: 48,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PaginationConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 200,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LOTLINE_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.lock_timeout_ms", 5000)?
            .set_default("artifacts.cache_dir", "static/pdf_cache")?
            .set_default("dashboard.no_qc_hours", 24)?
            .set_default("dashboard.missing_net_weight_hours", 12)?
            .set_default("dashboard.no_fumigation_hours", 48)?
            .set_default("pagination.default_page_size", 10)?
            .set_default("pagination.max_page_size", 200)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LOTLINE_ prefix)
            .add_source(
                Environment::with_prefix("LOTLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

use common::StorageConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use worker::WorkerConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Re-enqueueing of files whose job was lost or dropped.
#[derive(Debug, Deserialize, Clone)]
pub struct RecoveryConfig {
    /// Default: true.
    #[serde(default = "default_recovery_enabled")]
    pub enabled: bool,
    /// Seconds between scans. Default: 60.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// A `pending`/`processing` file untouched for this long is considered
    /// stuck. Must exceed the worker job timeout. Default: 3600.
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,
    /// Re-enqueues per file before it is marked failed. Default: 3.
    #[serde(default = "default_max_requeues")]
    pub max_requeues: u8,
}

fn default_recovery_enabled() -> bool {
    true
}
fn default_scan_interval_secs() -> u64 {
    60
}
fn default_stuck_timeout_secs() -> u64 {
    3600
}
fn default_max_requeues() -> u8 {
    3
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_recovery_enabled(),
            scan_interval_secs: default_scan_interval_secs(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
            max_requeues: default_max_requeues(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SILO_CONFIG").unwrap_or_else(|_| "config/config".into());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("database.url", "sqlite://silo.db?mode=rwc")?
            // Load from config/config.toml
            .add_source(File::with_name(&path).required(false))
            // Override from environment (e.g., SILO__STORAGE__ROOT)
            .add_source(Environment::with_prefix("SILO").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

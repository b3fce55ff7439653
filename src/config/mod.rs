//! Process configuration.
//!
//! Everything comes from environment variables, with a `.env` file loaded
//! first when one exists. Scheduling tunables are not here: they live in
//! the settings store so they can change while the scheduler runs.

use std::env;
use std::path::PathBuf;

use crate::error::AppError;
use crate::scheduling::circuit_breaker::CircuitBreakerConfig;
use crate::scheduling::PolicyKind;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection settings.
    pub database: DatabaseConfig,
    /// Log level and output format.
    pub logging: LoggingConfig,
    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Policy the background scheduler runs each tick.
    pub policy: PolicyKind,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file, created on first start.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/scheduler.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let circuit_breaker = CircuitBreakerConfig::from_env();

        let policy = match env::var("SCHEDULER_POLICY") {
            Ok(raw) => raw.parse::<PolicyKind>().map_err(|e| AppError::Config { message: e })?,
            Err(_) => PolicyKind::Bandit,
        };

        Ok(Config {
            database,
            logging,
            circuit_breaker,
            policy,
        })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/scheduler.db"),
            max_connections: 5,
        }
    }
}

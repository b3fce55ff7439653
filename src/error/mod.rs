use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Provider not found: {provider_id}")]
    ProviderNotFound { provider_id: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised by the scheduling core.
///
/// Cycle-level failures never escape `DecisionEngine::run_cycle`; they are
/// folded into the returned `CycleResult` so the background scheduler can
/// record them and keep ticking.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid scheduling configuration: {field} - {reason}")]
    Configuration { field: String, reason: String },

    #[error("Telemetry unavailable for provider {provider_id}: {message}")]
    TelemetryUnavailable { provider_id: String, message: String },

    #[error("Failed to persist provider {provider_id}: {message}")]
    Persistence { provider_id: String, message: String },

    #[error("Failed to write schedule log: {message}")]
    AuditLog { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SchedulerError {
    /// Shorthand for a rejected configuration value.
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SchedulerError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for scheduling operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(err.to_string(), "Database connection failed: failed to connect");

        let err = StorageError::ProviderNotFound {
            provider_id: "openai-1".to_string(),
        };
        assert_eq!(err.to_string(), "Provider not found: openai-1");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::configuration("schedule_interval_seconds", "must be 30-300");
        assert_eq!(
            err.to_string(),
            "Invalid scheduling configuration: schedule_interval_seconds - must be 30-300"
        );

        let err = SchedulerError::TelemetryUnavailable {
            provider_id: "p1".to_string(),
            message: "db locked".to_string(),
        };
        assert!(err.to_string().contains("p1"));
        assert!(err.to_string().contains("db locked"));
    }

    #[test]
    fn test_storage_error_converts_into_scheduler_and_app_errors() {
        let storage = StorageError::Connection {
            message: "database is locked".to_string(),
        };
        let sched: SchedulerError = storage.into();
        assert!(matches!(sched, SchedulerError::Storage(_)));

        let app: AppError = sched.into();
        assert!(app.to_string().starts_with("Scheduler error"));
    }
}

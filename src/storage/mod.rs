//! Storage layer for provider records, telemetry, schedule logs and settings.
//!
//! The scheduling core only talks to the traits defined here. Two backends
//! ship with the crate: [`SqliteStorage`] for deployments and
//! [`MemoryStorage`] for embedding and tests.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::scheduling::{ScheduleLog, ScheduleSettings};

/// Smallest weight a provider may carry.
pub const MIN_WEIGHT: u32 = 1;
/// Largest weight a provider may carry.
pub const MAX_WEIGHT: u32 = 100;

/// A routable upstream target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Unique provider identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Proportional traffic share, kept within `[1, 100]`.
    pub weight: u32,
    /// Routing priority, lower is preferred.
    pub priority: u32,
    /// Rollback reference weight, set on the first automated adjustment.
    pub base_weight: Option<u32>,
    /// Rollback reference priority, set on the first automated adjustment.
    pub base_priority: Option<u32>,
    /// Whether the provider takes part in routing and scheduling.
    pub enabled: bool,
    /// When the scheduler last wrote this provider.
    pub last_schedule_time: Option<DateTime<Utc>>,
}

impl Provider {
    /// Create an enabled provider with no baseline recorded.
    pub fn new(id: impl Into<String>, weight: u32, priority: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            weight: weight.clamp(MIN_WEIGHT, MAX_WEIGHT),
            priority,
            base_weight: None,
            base_priority: None,
            enabled: true,
            last_schedule_time: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set an existing baseline.
    pub fn with_baseline(mut self, base_weight: u32, base_priority: u32) -> Self {
        self.base_weight = Some(base_weight);
        self.base_priority = Some(base_priority);
        self
    }

    /// Mark the provider disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Baseline weight, falling back to the current weight when none was recorded.
    pub fn effective_base_weight(&self) -> u32 {
        self.base_weight.unwrap_or(self.weight)
    }

    /// Baseline priority, falling back to the current priority when none was recorded.
    pub fn effective_base_priority(&self) -> u32 {
        self.base_priority.unwrap_or(self.priority)
    }
}

/// Partial write to a provider record.
///
/// `base_weight` and `base_priority` are first-write-wins: a store only
/// applies them when the stored column is still empty. Clearing a baseline
/// goes through [`ProviderStore::reset_baselines`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderUpdate {
    /// New weight.
    pub weight: Option<u32>,
    /// New priority.
    pub priority: Option<u32>,
    /// Baseline weight to seed if none is recorded.
    pub base_weight: Option<u32>,
    /// Baseline priority to seed if none is recorded.
    pub base_priority: Option<u32>,
    /// Schedule timestamp.
    pub last_schedule_time: Option<DateTime<Utc>>,
}

/// Aggregated telemetry for one provider over one lookback window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    /// Number of calls in the window.
    pub requests: u64,
    /// Summed cost of those calls.
    pub cost: f64,
    /// Mean response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// Number of failed calls.
    pub error_count: u64,
}

impl WindowStats {
    /// Error rate in `[0, 1]`, zero when there were no requests.
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.error_count as f64 / self.requests as f64).min(1.0)
        }
    }
}

/// One recorded upstream call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Provider that served the call.
    pub provider_id: String,
    /// When the call completed.
    pub created_at: DateTime<Utc>,
    /// Response time in milliseconds.
    pub duration_ms: i64,
    /// Cost billed for the call.
    pub cost: f64,
    /// Whether the call succeeded.
    pub success: bool,
}

impl RequestRecord {
    /// Record a call completed now.
    pub fn now(provider_id: impl Into<String>, duration_ms: i64, success: bool) -> Self {
        Self {
            provider_id: provider_id.into(),
            created_at: Utc::now(),
            duration_ms,
            cost: 0.0,
            success,
        }
    }
}

/// Provider records owned by the routing configuration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// List providers, optionally only the enabled ones, ordered by id.
    async fn list_providers(&self, enabled_only: bool) -> StorageResult<Vec<Provider>>;

    /// Get a provider by id.
    async fn get_provider(&self, id: &str) -> StorageResult<Option<Provider>>;

    /// Insert or replace a provider record.
    async fn upsert_provider(&self, provider: &Provider) -> StorageResult<()>;

    /// Apply a partial update and return the stored record.
    ///
    /// Fails with `StorageError::ProviderNotFound` for unknown ids.
    async fn update_provider(&self, id: &str, update: &ProviderUpdate) -> StorageResult<Provider>;

    /// Clear the baseline of one provider (`Some(id)`) or of all providers.
    ///
    /// Returns the number of records touched.
    async fn reset_baselines(&self, provider_id: Option<String>) -> StorageResult<u64>;
}

/// Pre-aggregated call telemetry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Stats over the last `window_minutes` minutes.
    async fn windowed_stats(&self, provider_id: &str, window_minutes: u32)
        -> StorageResult<WindowStats>;

    /// Stats over one UTC calendar day.
    async fn daily_stats(&self, provider_id: &str, day: NaiveDate) -> StorageResult<WindowStats>;

    /// Append one call record.
    async fn record_request(&self, record: &RequestRecord) -> StorageResult<()>;
}

/// Append-only audit trail of scheduling cycles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleLogStore: Send + Sync {
    /// Append a log and return its id.
    async fn append_log(&self, log: &ScheduleLog) -> StorageResult<String>;

    /// Most recent logs first.
    async fn list_logs(&self, limit: u32, offset: u32) -> StorageResult<Vec<ScheduleLog>>;

    /// Get one log by id.
    async fn get_log(&self, id: &str) -> StorageResult<Option<ScheduleLog>>;

    /// Total number of logs.
    async fn count_logs(&self) -> StorageResult<u64>;
}

/// Persisted scheduling tunables.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings, defaults when nothing was saved yet.
    async fn get_settings(&self) -> StorageResult<ScheduleSettings>;

    /// Replace the stored settings. Callers validate first.
    async fn save_settings(&self, settings: &ScheduleSettings) -> StorageResult<()>;
}

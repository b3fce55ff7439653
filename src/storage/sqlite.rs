use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    Provider, ProviderStore, ProviderUpdate, RequestRecord, ScheduleLogStore, SettingsStore,
    TelemetryStore, WindowStats,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::scheduling::{PolicyKind, ScheduleLog, ScheduleSettings};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Timestamps are stored as fixed-width UTC strings so they sort lexically.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization {
            message: format!("Invalid timestamp '{}': {}", raw, e),
        })
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database, migrated and ready.
    ///
    /// The pool holds a single connection that never expires, since every
    /// new connection to `:memory:` would open an empty database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    async fn stats_between(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> StorageResult<WindowStats> {
        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS requests,
                CAST(COALESCE(SUM(cost), 0) AS REAL) AS cost,
                CAST(COALESCE(AVG(duration_ms), 0) AS REAL) AS avg_response_time_ms,
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) AS error_count
            FROM request_logs
            WHERE provider_id = ?
              AND created_at >= ?
              AND (? IS NULL OR created_at < ?)
            "#,
        )
        .bind(provider_id)
        .bind(timestamp(&from))
        .bind(to.as_ref().map(timestamp))
        .bind(to.as_ref().map(timestamp))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}

#[async_trait]
impl ProviderStore for SqliteStorage {
    async fn list_providers(&self, enabled_only: bool) -> StorageResult<Vec<Provider>> {
        let rows: Vec<ProviderRow> = sqlx::query_as(
            r#"
            SELECT id, name, weight, priority, base_weight, base_priority, enabled,
                last_schedule_time
            FROM providers
            WHERE (? = 0 OR enabled = 1)
            ORDER BY id ASC
            "#,
        )
        .bind(enabled_only)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Provider::try_from).collect()
    }

    async fn get_provider(&self, id: &str) -> StorageResult<Option<Provider>> {
        let row: Option<ProviderRow> = sqlx::query_as(
            r#"
            SELECT id, name, weight, priority, base_weight, base_priority, enabled,
                last_schedule_time
            FROM providers
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Provider::try_from).transpose()
    }

    async fn upsert_provider(&self, provider: &Provider) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO providers (
                id, name, weight, priority, base_weight, base_priority, enabled, last_schedule_time
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                weight = excluded.weight,
                priority = excluded.priority,
                base_weight = excluded.base_weight,
                base_priority = excluded.base_priority,
                enabled = excluded.enabled,
                last_schedule_time = excluded.last_schedule_time
            "#,
        )
        .bind(&provider.id)
        .bind(&provider.name)
        .bind(i64::from(provider.weight))
        .bind(i64::from(provider.priority))
        .bind(provider.base_weight.map(i64::from))
        .bind(provider.base_priority.map(i64::from))
        .bind(provider.enabled)
        .bind(provider.last_schedule_time.as_ref().map(timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_provider(&self, id: &str, update: &ProviderUpdate) -> StorageResult<Provider> {
        // Baseline columns only take a value while still NULL
        let result = sqlx::query(
            r#"
            UPDATE providers
            SET weight = COALESCE(?, weight),
                priority = COALESCE(?, priority),
                base_weight = COALESCE(base_weight, ?),
                base_priority = COALESCE(base_priority, ?),
                last_schedule_time = COALESCE(?, last_schedule_time)
            WHERE id = ?
            "#,
        )
        .bind(update.weight.map(i64::from))
        .bind(update.priority.map(i64::from))
        .bind(update.base_weight.map(i64::from))
        .bind(update.base_priority.map(i64::from))
        .bind(update.last_schedule_time.as_ref().map(timestamp))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ProviderNotFound {
                provider_id: id.to_string(),
            });
        }

        debug!(provider_id = id, "Provider updated");

        self.get_provider(id)
            .await?
            .ok_or_else(|| StorageError::ProviderNotFound {
                provider_id: id.to_string(),
            })
    }

    async fn reset_baselines(&self, provider_id: Option<String>) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE providers
            SET base_weight = NULL, base_priority = NULL
            WHERE (? IS NULL OR id = ?)
            "#,
        )
        .bind(&provider_id)
        .bind(&provider_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TelemetryStore for SqliteStorage {
    async fn windowed_stats(
        &self,
        provider_id: &str,
        window_minutes: u32,
    ) -> StorageResult<WindowStats> {
        let from = Utc::now() - Duration::minutes(i64::from(window_minutes));
        self.stats_between(provider_id, from, None).await
    }

    async fn daily_stats(&self, provider_id: &str, day: NaiveDate) -> StorageResult<WindowStats> {
        let from = day.and_time(chrono::NaiveTime::MIN).and_utc();
        self.stats_between(provider_id, from, Some(from + Duration::days(1)))
            .await
    }

    async fn record_request(&self, record: &RequestRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO request_logs (provider_id, created_at, duration_ms, cost, success)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.provider_id)
        .bind(timestamp(&record.created_at))
        .bind(record.duration_ms)
        .bind(record.cost)
        .bind(record.success)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ScheduleLogStore for SqliteStorage {
    async fn append_log(&self, log: &ScheduleLog) -> StorageResult<String> {
        let decisions = serde_json::to_string(&log.decisions).map_err(|e| {
            StorageError::Serialization {
                message: format!("Failed to encode decisions: {}", e),
            }
        })?;
        let summary =
            serde_json::to_string(&log.summary).map_err(|e| StorageError::Serialization {
                message: format!("Failed to encode summary: {}", e),
            })?;

        sqlx::query(
            r#"
            INSERT INTO schedule_logs (
                id, executed_at, executor, policy, dry_run, total_providers, affected_providers,
                decisions, summary
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(timestamp(&log.executed_at))
        .bind(&log.executor)
        .bind(log.policy.as_str())
        .bind(log.dry_run)
        .bind(i64::from(log.total_providers))
        .bind(i64::from(log.affected_providers))
        .bind(&decisions)
        .bind(&summary)
        .execute(&self.pool)
        .await?;

        Ok(log.id.clone())
    }

    async fn list_logs(&self, limit: u32, offset: u32) -> StorageResult<Vec<ScheduleLog>> {
        let rows: Vec<ScheduleLogRow> = sqlx::query_as(
            r#"
            SELECT id, executed_at, executor, policy, dry_run, total_providers, affected_providers,
                decisions, summary
            FROM schedule_logs
            ORDER BY executed_at DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScheduleLog::try_from).collect()
    }

    async fn get_log(&self, id: &str) -> StorageResult<Option<ScheduleLog>> {
        let row: Option<ScheduleLogRow> = sqlx::query_as(
            r#"
            SELECT id, executed_at, executor, policy, dry_run, total_providers, affected_providers,
                decisions, summary
            FROM schedule_logs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ScheduleLog::try_from).transpose()
    }

    async fn count_logs(&self) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schedule_logs")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl SettingsStore for SqliteStorage {
    async fn get_settings(&self) -> StorageResult<ScheduleSettings> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT settings FROM schedule_settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        match raw {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StorageError::Serialization {
                message: format!("Failed to decode settings: {}", e),
            }),
            None => Ok(ScheduleSettings::default()),
        }
    }

    async fn save_settings(&self, settings: &ScheduleSettings) -> StorageResult<()> {
        let raw = serde_json::to_string(settings).map_err(|e| StorageError::Serialization {
            message: format!("Failed to encode settings: {}", e),
        })?;

        sqlx::query(
            r#"
            INSERT INTO schedule_settings (id, settings, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                settings = excluded.settings,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&raw)
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: String,
    name: String,
    weight: i64,
    priority: i64,
    base_weight: Option<i64>,
    base_priority: Option<i64>,
    enabled: bool,
    last_schedule_time: Option<String>,
}

impl TryFrom<ProviderRow> for Provider {
    type Error = StorageError;

    fn try_from(row: ProviderRow) -> StorageResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            weight: to_u32(row.weight),
            priority: to_u32(row.priority),
            base_weight: row.base_weight.map(to_u32),
            base_priority: row.base_priority.map(to_u32),
            enabled: row.enabled,
            last_schedule_time: row
                .last_schedule_time
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    requests: i64,
    cost: f64,
    avg_response_time_ms: f64,
    error_count: i64,
}

impl From<StatsRow> for WindowStats {
    fn from(row: StatsRow) -> Self {
        Self {
            requests: row.requests.max(0) as u64,
            cost: row.cost,
            avg_response_time_ms: row.avg_response_time_ms,
            error_count: row.error_count.max(0) as u64,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleLogRow {
    id: String,
    executed_at: String,
    executor: String,
    policy: String,
    dry_run: bool,
    total_providers: i64,
    affected_providers: i64,
    decisions: String,
    summary: String,
}

impl TryFrom<ScheduleLogRow> for ScheduleLog {
    type Error = StorageError;

    fn try_from(row: ScheduleLogRow) -> StorageResult<Self> {
        let policy = PolicyKind::from_str(&row.policy)
            .map_err(|message| StorageError::Serialization { message })?;
        let decisions = serde_json::from_str(&row.decisions).map_err(|e| {
            StorageError::Serialization {
                message: format!("Failed to decode decisions of log {}: {}", row.id, e),
            }
        })?;
        let summary = serde_json::from_str(&row.summary).map_err(|e| {
            StorageError::Serialization {
                message: format!("Failed to decode summary of log {}: {}", row.id, e),
            }
        })?;

        Ok(Self {
            executed_at: parse_timestamp(&row.executed_at)?,
            id: row.id,
            executor: row.executor,
            policy,
            dry_run: row.dry_run,
            total_providers: to_u32(row.total_providers),
            affected_providers: to_u32(row.affected_providers),
            decisions,
            summary,
        })
    }
}

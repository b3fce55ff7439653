//! In-process storage backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tokio::sync::RwLock;

use super::{
    Provider, ProviderStore, ProviderUpdate, RequestRecord, ScheduleLogStore, SettingsStore,
    TelemetryStore, WindowStats,
};
use crate::error::{StorageError, StorageResult};
use crate::scheduling::{ScheduleLog, ScheduleSettings};

/// Storage held entirely in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    providers: RwLock<BTreeMap<String, Provider>>,
    requests: RwLock<Vec<RequestRecord>>,
    logs: RwLock<Vec<ScheduleLog>>,
    settings: RwLock<Option<ScheduleSettings>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn aggregate<'a>(records: impl Iterator<Item = &'a RequestRecord>) -> WindowStats {
    let mut stats = WindowStats::default();
    let mut total_duration = 0_i64;

    for record in records {
        stats.requests += 1;
        stats.cost += record.cost;
        total_duration += record.duration_ms;
        if !record.success {
            stats.error_count += 1;
        }
    }

    if stats.requests > 0 {
        stats.avg_response_time_ms = total_duration as f64 / stats.requests as f64;
    }
    stats
}

#[async_trait]
impl ProviderStore for MemoryStorage {
    async fn list_providers(&self, enabled_only: bool) -> StorageResult<Vec<Provider>> {
        let providers = self.providers.read().await;
        Ok(providers
            .values()
            .filter(|p| !enabled_only || p.enabled)
            .cloned()
            .collect())
    }

    async fn get_provider(&self, id: &str) -> StorageResult<Option<Provider>> {
        Ok(self.providers.read().await.get(id).cloned())
    }

    async fn upsert_provider(&self, provider: &Provider) -> StorageResult<()> {
        self.providers
            .write()
            .await
            .insert(provider.id.clone(), provider.clone());
        Ok(())
    }

    async fn update_provider(&self, id: &str, update: &ProviderUpdate) -> StorageResult<Provider> {
        let mut providers = self.providers.write().await;
        let provider = providers
            .get_mut(id)
            .ok_or_else(|| StorageError::ProviderNotFound {
                provider_id: id.to_string(),
            })?;

        if let Some(weight) = update.weight {
            provider.weight = weight;
        }
        if let Some(priority) = update.priority {
            provider.priority = priority;
        }
        // First write wins
        provider.base_weight = provider.base_weight.or(update.base_weight);
        provider.base_priority = provider.base_priority.or(update.base_priority);
        if update.last_schedule_time.is_some() {
            provider.last_schedule_time = update.last_schedule_time;
        }

        Ok(provider.clone())
    }

    async fn reset_baselines(&self, provider_id: Option<String>) -> StorageResult<u64> {
        let mut providers = self.providers.write().await;
        let mut touched = 0;
        for provider in providers
            .values_mut()
            .filter(|p| provider_id.as_deref().map_or(true, |id| p.id == id))
        {
            provider.base_weight = None;
            provider.base_priority = None;
            touched += 1;
        }
        Ok(touched)
    }
}

#[async_trait]
impl TelemetryStore for MemoryStorage {
    async fn windowed_stats(
        &self,
        provider_id: &str,
        window_minutes: u32,
    ) -> StorageResult<WindowStats> {
        let cutoff = Utc::now() - Duration::minutes(i64::from(window_minutes));
        let requests = self.requests.read().await;
        Ok(aggregate(
            requests
                .iter()
                .filter(|r| r.provider_id == provider_id && r.created_at >= cutoff),
        ))
    }

    async fn daily_stats(&self, provider_id: &str, day: NaiveDate) -> StorageResult<WindowStats> {
        let requests = self.requests.read().await;
        Ok(aggregate(
            requests
                .iter()
                .filter(|r| r.provider_id == provider_id && r.created_at.date_naive() == day),
        ))
    }

    async fn record_request(&self, record: &RequestRecord) -> StorageResult<()> {
        self.requests.write().await.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl ScheduleLogStore for MemoryStorage {
    async fn append_log(&self, log: &ScheduleLog) -> StorageResult<String> {
        self.logs.write().await.push(log.clone());
        Ok(log.id.clone())
    }

    async fn list_logs(&self, limit: u32, offset: u32) -> StorageResult<Vec<ScheduleLog>> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_log(&self, id: &str) -> StorageResult<Option<ScheduleLog>> {
        Ok(self.logs.read().await.iter().find(|l| l.id == id).cloned())
    }

    async fn count_logs(&self) -> StorageResult<u64> {
        Ok(self.logs.read().await.len() as u64)
    }
}

#[async_trait]
impl SettingsStore for MemoryStorage {
    async fn get_settings(&self) -> StorageResult<ScheduleSettings> {
        Ok(self.settings.read().await.clone().unwrap_or_default())
    }

    async fn save_settings(&self, settings: &ScheduleSettings) -> StorageResult<()> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}

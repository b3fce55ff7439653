//! Decision engine: one scheduling cycle, end to end.
//!
//! A cycle loads settings, snapshots every enabled provider, runs the chosen
//! policy, commits changed providers and appends one audit log. The first
//! four steps are all-or-nothing: any failure aborts the cycle before a
//! provider is written. Commit and audit logging are best-effort.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::aggregator::WindowAggregator;
use super::bandit::BanditScheduler;
use super::circuit_breaker::{CircuitHealth, ProviderCircuitBreaker};
use super::policy::{PolicyKind, ProviderSnapshot, SchedulingPolicy, Suggestion};
use super::rules::RuleScheduler;
use super::settings::{ScheduleSettings, SettingsUpdate};
use super::types::{
    AfterState, BeforeState, Baseline, DecisionMetrics, ScheduleDecision, ScheduleLog,
    ScheduleSummary, EXECUTOR_AUTO,
};
use crate::error::{SchedulerError, SchedulerResult};
use crate::storage::{
    ProviderStore, ProviderUpdate, ScheduleLogStore, SettingsStore, TelemetryStore, MAX_WEIGHT,
    MIN_WEIGHT,
};

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResult {
    /// Whether the cycle completed its planning steps
    pub ok: bool,
    /// Providers considered
    pub total_providers: u32,
    /// Providers promoted, demoted or recovered
    pub affected_providers: u32,
    /// Every decision of the cycle
    pub decisions: Vec<ScheduleDecision>,
    /// Counts by action
    pub summary: ScheduleSummary,
    /// Why the cycle failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Id of the audit log, if it was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<String>,
    /// Providers whose commit failed
    pub persistence_failures: u32,
    /// Enable flag read at the start of the cycle; false for failed cycles
    pub realtime_enabled: bool,
    /// Wall time of the cycle
    pub duration_ms: u64,
}

impl CycleResult {
    fn failed(error: &SchedulerError, started: Instant) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        }
    }
}

/// Runs scheduling cycles against the stores.
pub struct DecisionEngine {
    providers: Arc<dyn ProviderStore>,
    logs: Arc<dyn ScheduleLogStore>,
    settings: Arc<dyn SettingsStore>,
    breaker: Arc<ProviderCircuitBreaker>,
    aggregator: WindowAggregator,
    bandit: BanditScheduler,
    rules: RuleScheduler,
}

impl DecisionEngine {
    /// Create an engine over separate stores.
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        telemetry: Arc<dyn TelemetryStore>,
        logs: Arc<dyn ScheduleLogStore>,
        settings: Arc<dyn SettingsStore>,
        breaker: Arc<ProviderCircuitBreaker>,
    ) -> Self {
        Self {
            providers,
            logs,
            settings,
            aggregator: WindowAggregator::new(telemetry, breaker.clone()),
            breaker,
            bandit: BanditScheduler::new(),
            rules: RuleScheduler::new(),
        }
    }

    /// Create an engine over one backend implementing every store.
    pub fn with_storage<S>(storage: Arc<S>, breaker: Arc<ProviderCircuitBreaker>) -> Self
    where
        S: ProviderStore + TelemetryStore + ScheduleLogStore + SettingsStore + 'static,
    {
        Self::new(
            storage.clone(),
            storage.clone(),
            storage.clone(),
            storage,
            breaker,
        )
    }

    /// Replace the bandit, e.g. with a seeded one.
    pub fn with_bandit(mut self, bandit: BanditScheduler) -> Self {
        self.bandit = bandit;
        self
    }

    /// Shared circuit breaker.
    pub fn breaker(&self) -> &Arc<ProviderCircuitBreaker> {
        &self.breaker
    }

    fn policy(&self, kind: PolicyKind) -> &dyn SchedulingPolicy {
        match kind {
            PolicyKind::Bandit => &self.bandit,
            PolicyKind::Rule => &self.rules,
        }
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Load and validate the stored settings.
    pub async fn load_settings(&self) -> SchedulerResult<ScheduleSettings> {
        let settings = self
            .settings
            .get_settings()
            .await
            .map_err(|e| SchedulerError::configuration("settings", e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate a partial update and persist the merged settings.
    pub async fn update_settings(
        &self,
        update: &SettingsUpdate,
    ) -> SchedulerResult<ScheduleSettings> {
        let current = self.load_settings().await?;
        let merged = current.apply(update)?;
        self.settings.save_settings(&merged).await?;
        info!(
            enabled = merged.enable_realtime_schedule,
            interval_seconds = merged.schedule_interval_seconds,
            "Scheduling settings updated"
        );
        Ok(merged)
    }

    // ========================================================================
    // Cycles
    // ========================================================================

    /// Run one cycle.
    ///
    /// Never returns an error: failures are reported through
    /// [`CycleResult::ok`] and [`CycleResult::error`].
    pub async fn run_cycle(
        &self,
        policy: PolicyKind,
        dry_run: bool,
        executor: &str,
    ) -> CycleResult {
        let started = Instant::now();
        info!(policy = %policy, dry_run, executor, "Starting scheduling cycle");

        let (settings, decisions) = match self.plan(policy).await {
            Ok(planned) => planned,
            Err(e) => {
                error!(policy = %policy, error = %e, "Scheduling cycle aborted");
                return CycleResult::failed(&e, started);
            }
        };

        let persistence_failures = if dry_run { 0 } else { self.commit(&decisions).await };

        let log = ScheduleLog::new(executor, policy, dry_run, decisions);
        let log_id = match self.logs.append_log(&log).await {
            Ok(id) => Some(id),
            Err(e) => {
                let e = SchedulerError::AuditLog {
                    message: e.to_string(),
                };
                warn!(error = %e, "Schedule log not written, cycle result kept");
                None
            }
        };

        let result = CycleResult {
            ok: true,
            total_providers: log.total_providers,
            affected_providers: log.affected_providers,
            summary: log.summary,
            decisions: log.decisions,
            error: None,
            log_id,
            persistence_failures,
            realtime_enabled: settings.enable_realtime_schedule,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            policy = %policy,
            dry_run,
            total = result.total_providers,
            affected = result.affected_providers,
            promoted = result.summary.promoted,
            demoted = result.summary.demoted,
            circuit_open = result.summary.circuit_open,
            persistence_failures,
            duration_ms = result.duration_ms,
            "Scheduling cycle completed"
        );

        result
    }

    /// Dry-run the rule policy.
    pub async fn preview(&self) -> CycleResult {
        self.run_cycle(PolicyKind::Rule, true, EXECUTOR_AUTO).await
    }

    /// Steps that must all succeed before anything is written.
    async fn plan(
        &self,
        policy: PolicyKind,
    ) -> SchedulerResult<(ScheduleSettings, Vec<ScheduleDecision>)> {
        let settings = self.load_settings().await?;
        self.breaker
            .set_half_open_success_threshold(settings.circuit_recovery_observation_count)
            .await;

        let providers = self.providers.list_providers(true).await?;
        if providers.is_empty() {
            debug!("No enabled providers, nothing to schedule");
            return Ok((settings, Vec::new()));
        }

        let snapshots = match policy {
            PolicyKind::Bandit => self.aggregator.window_snapshots(&providers, &settings).await?,
            PolicyKind::Rule => {
                self.aggregator
                    .daily_snapshots(&providers, Utc::now().date_naive())
                    .await?
            }
        };

        let suggestions = self.policy(policy).decide_all(&snapshots, &settings);
        let decisions = snapshots
            .into_iter()
            .zip(suggestions)
            .map(|(snapshot, suggestion)| to_decision(snapshot, suggestion))
            .collect();

        Ok((settings, decisions))
    }

    /// Write changed providers. Returns the number of failed writes.
    async fn commit(&self, decisions: &[ScheduleDecision]) -> u32 {
        let now = Utc::now();
        let mut failures = 0;

        for decision in decisions {
            if !decision.changed() {
                continue;
            }
            let weight = decision.after_state.weight.clamp(MIN_WEIGHT, MAX_WEIGHT);
            let priority = decision.after_state.priority;

            let update = ProviderUpdate {
                weight: Some(weight),
                priority: Some(priority),
                base_weight: Some(decision.baseline.weight),
                base_priority: Some(decision.baseline.priority),
                last_schedule_time: Some(now),
            };

            match self.providers.update_provider(&decision.provider_id, &update).await {
                Ok(_) => debug!(
                    provider_id = %decision.provider_id,
                    from_weight = decision.before_state.weight,
                    delta = decision.weight_delta(),
                    weight,
                    priority,
                    action = %decision.action,
                    "Provider schedule committed"
                ),
                Err(e) => {
                    let e = SchedulerError::Persistence {
                        provider_id: decision.provider_id.clone(),
                        message: e.to_string(),
                    };
                    warn!(error = %e, "Skipping provider, previous schedule kept");
                    failures += 1;
                }
            }
        }

        failures
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Clear the baseline of one provider or, with `None`, of all providers.
    pub async fn reset_provider_baseline(
        &self,
        provider_id: Option<String>,
    ) -> SchedulerResult<u64> {
        if let Some(id) = &provider_id {
            self.require_provider(id).await?;
        }
        let cleared = self.providers.reset_baselines(provider_id.clone()).await?;
        info!(
            provider_id = provider_id.as_deref().unwrap_or("*"),
            cleared,
            "Provider baselines reset"
        );
        Ok(cleared)
    }

    /// Force a provider's circuit closed.
    pub async fn reset_circuit(&self, provider_id: &str) -> SchedulerResult<CircuitHealth> {
        self.require_provider(provider_id).await?;
        self.breaker.reset(provider_id).await;
        Ok(self.breaker.health(provider_id).await)
    }

    /// Current circuit health of a provider.
    pub async fn circuit_health(&self, provider_id: &str) -> CircuitHealth {
        self.breaker.health(provider_id).await
    }

    async fn require_provider(&self, provider_id: &str) -> SchedulerResult<()> {
        match self.providers.get_provider(provider_id).await? {
            Some(_) => Ok(()),
            None => Err(SchedulerError::NotFound {
                what: format!("provider {}", provider_id),
            }),
        }
    }

    // ========================================================================
    // Audit log
    // ========================================================================

    /// Most recent logs first.
    pub async fn list_logs(&self, limit: u32, offset: u32) -> SchedulerResult<Vec<ScheduleLog>> {
        Ok(self.logs.list_logs(limit, offset).await?)
    }

    /// One log by id.
    pub async fn get_log(&self, id: &str) -> SchedulerResult<ScheduleLog> {
        self.logs
            .get_log(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound {
                what: format!("schedule log {}", id),
            })
    }

    /// Number of logs.
    pub async fn count_logs(&self) -> SchedulerResult<u64> {
        Ok(self.logs.count_logs().await?)
    }
}

fn to_decision(snapshot: ProviderSnapshot, suggestion: Suggestion) -> ScheduleDecision {
    let ProviderSnapshot {
        provider,
        health,
        signal,
        windows,
        trend,
    } = snapshot;

    ScheduleDecision {
        before_state: BeforeState {
            weight: provider.weight,
            priority: provider.priority,
            score: signal.score,
            circuit_state: health.circuit_state,
        },
        after_state: AfterState {
            weight: suggestion.weight,
            priority: suggestion.priority,
            score: signal.score,
            reason: suggestion.reason.clone(),
        },
        metrics: DecisionMetrics {
            signal,
            windows,
            trend,
            ucb_value: suggestion.ucb_value.filter(|v| v.is_finite()),
        },
        action: suggestion.action,
        reason: suggestion.reason,
        confidence: suggestion.confidence,
        baseline: Baseline {
            weight: provider.effective_base_weight(),
            priority: provider.effective_base_priority(),
        },
        is_exploration: suggestion.is_exploration,
        provider_id: provider.id,
        provider_name: provider.name,
    }
}

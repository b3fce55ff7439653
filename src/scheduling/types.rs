//! Core types for scheduling cycles.
//!
//! - [`MultiWindowMetrics`]: short/medium/long telemetry plus the fused signal
//! - [`ScheduleDecision`]: one provider's outcome for one cycle
//! - [`ScheduleLog`]: append-only audit record of a whole cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::circuit_breaker::CircuitState;
use super::policy::PolicyKind;
use super::scoring::Trend;
use crate::storage::WindowStats;

/// Executor identity for manual runs without a named user.
pub const EXECUTOR_AUTO: &str = "auto";
/// Executor identity for background scheduler runs.
pub const EXECUTOR_REALTIME: &str = "realtime-auto";

// ============================================================================
// Metrics
// ============================================================================

/// Telemetry for one lookback window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowMetrics {
    /// Calls in the window
    pub requests: u64,
    /// Failed share of calls (0-1)
    pub error_rate: f64,
    /// Mean response time (ms)
    pub avg_response_time: f64,
    /// Summed cost
    pub cost: f64,
}

impl From<WindowStats> for WindowMetrics {
    fn from(stats: WindowStats) -> Self {
        Self {
            requests: stats.requests,
            error_rate: stats.error_rate(),
            avg_response_time: stats.avg_response_time_ms,
            cost: stats.cost,
        }
    }
}

/// Single performance signal blended from several windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedMetrics {
    /// Performance score (0-100)
    pub score: f64,
    /// Sample size behind the signal
    pub requests: u64,
    /// Blended error rate (0-1)
    pub error_rate: f64,
    /// Blended mean response time (ms)
    pub avg_response_time: f64,
}

/// Short, medium and long window telemetry with the fused result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiWindowMetrics {
    /// Most recent window
    pub short: WindowMetrics,
    /// Middle window
    pub medium: WindowMetrics,
    /// Longest window
    pub long: WindowMetrics,
    /// Decay-weighted blend of the three
    pub weighted: FusedMetrics,
}

/// Day-over-day movement used by the rule policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTrend {
    /// Yesterday's telemetry
    pub yesterday: WindowMetrics,
    /// Request volume trend
    pub requests: Trend,
    /// Error rate trend (lower is better)
    pub error_rate: Trend,
    /// Latency trend (lower is better)
    pub avg_response_time: Trend,
}

/// Metrics carried into a decision for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionMetrics {
    /// Signal the policy acted on
    pub signal: FusedMetrics,
    /// Per-window breakdown (bandit policy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows: Option<MultiWindowMetrics>,
    /// Day-over-day trend (rule policy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<DailyTrend>,
    /// UCB1 value; `None` stands for infinity (untried provider)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ucb_value: Option<f64>,
}

// ============================================================================
// Actions
// ============================================================================

/// Outcome class of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAction {
    /// Weight raised
    Promote,
    /// Weight lowered
    Demote,
    /// No data-driven change
    Maintain,
    /// Returned toward the baseline
    Recover,
    /// Penalised for an open circuit
    CircuitPenalty,
    /// Held for exploration
    Explore,
}

impl ScheduleAction {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleAction::Promote => "promote",
            ScheduleAction::Demote => "demote",
            ScheduleAction::Maintain => "maintain",
            ScheduleAction::Recover => "recover",
            ScheduleAction::CircuitPenalty => "circuit_penalty",
            ScheduleAction::Explore => "explore",
        }
    }
}

impl std::fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScheduleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "promote" => Ok(ScheduleAction::Promote),
            "demote" => Ok(ScheduleAction::Demote),
            "maintain" => Ok(ScheduleAction::Maintain),
            "recover" => Ok(ScheduleAction::Recover),
            "circuit_penalty" => Ok(ScheduleAction::CircuitPenalty),
            "explore" => Ok(ScheduleAction::Explore),
            _ => Err(format!("Unknown schedule action: {}", s)),
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Provider state before the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeState {
    /// Weight before the cycle
    pub weight: u32,
    /// Priority before the cycle
    pub priority: u32,
    /// Score the policy saw
    pub score: f64,
    /// Circuit state at query time
    pub circuit_state: CircuitState,
}

/// Suggested provider state after the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterState {
    /// Suggested weight; 0 marks an isolated provider
    pub weight: u32,
    /// Suggested priority
    pub priority: u32,
    /// Score the policy saw
    pub score: f64,
    /// Why the policy chose this state
    pub reason: String,
}

/// Rollback reference carried through a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    /// Reference weight
    pub weight: u32,
    /// Reference priority
    pub priority: u32,
}

/// One provider's outcome for one cycle. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDecision {
    /// Provider identifier
    pub provider_id: String,
    /// Provider display name
    pub provider_name: String,
    /// State before the cycle
    pub before_state: BeforeState,
    /// Suggested state after the cycle
    pub after_state: AfterState,
    /// Metrics the policy acted on
    pub metrics: DecisionMetrics,
    /// Outcome class
    pub action: ScheduleAction,
    /// Human-readable reason
    pub reason: String,
    /// Confidence in the data (0-100)
    pub confidence: u8,
    /// Rollback reference
    pub baseline: Baseline,
    /// Whether the decision was made to gather data
    pub is_exploration: bool,
}

impl ScheduleDecision {
    /// Whether the suggested weight or priority differs from the current one.
    pub fn changed(&self) -> bool {
        self.before_state.weight != self.after_state.weight
            || self.before_state.priority != self.after_state.priority
    }

    /// Signed weight change.
    pub fn weight_delta(&self) -> i64 {
        i64::from(self.after_state.weight) - i64::from(self.before_state.weight)
    }
}

// ============================================================================
// Summary and Log
// ============================================================================

/// Decision counts by action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    /// `promote` decisions
    pub promoted: u32,
    /// `demote` decisions
    pub demoted: u32,
    /// `maintain` decisions
    pub maintained: u32,
    /// `recover` decisions
    pub recovered: u32,
    /// `circuit_penalty` decisions
    pub circuit_open: u32,
    /// `explore` decisions
    pub explored: u32,
}

impl ScheduleSummary {
    /// Count decisions by action.
    pub fn from_decisions(decisions: &[ScheduleDecision]) -> Self {
        let mut summary = Self::default();
        for decision in decisions {
            match decision.action {
                ScheduleAction::Promote => summary.promoted += 1,
                ScheduleAction::Demote => summary.demoted += 1,
                ScheduleAction::Maintain => summary.maintained += 1,
                ScheduleAction::Recover => summary.recovered += 1,
                ScheduleAction::CircuitPenalty => summary.circuit_open += 1,
                ScheduleAction::Explore => summary.explored += 1,
            }
        }
        summary
    }

    /// Providers counted as affected: promoted, demoted or recovered.
    pub fn affected(&self) -> u32 {
        self.promoted + self.demoted + self.recovered
    }
}

/// Audit record of one cycle. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleLog {
    /// Unique log identifier
    pub id: String,
    /// When the cycle ran
    pub executed_at: DateTime<Utc>,
    /// Who ran it: `auto`, `realtime-auto` or a user name
    pub executor: String,
    /// Policy that produced the decisions
    pub policy: PolicyKind,
    /// Whether changes were withheld
    pub dry_run: bool,
    /// Providers considered
    pub total_providers: u32,
    /// Providers promoted, demoted or recovered
    pub affected_providers: u32,
    /// Every decision of the cycle
    pub decisions: Vec<ScheduleDecision>,
    /// Counts by action
    pub summary: ScheduleSummary,
}

impl ScheduleLog {
    /// Build a log for a finished cycle.
    pub fn new(
        executor: impl Into<String>,
        policy: PolicyKind,
        dry_run: bool,
        decisions: Vec<ScheduleDecision>,
    ) -> Self {
        let summary = ScheduleSummary::from_decisions(&decisions);
        Self {
            id: format!("sched_{}", uuid::Uuid::new_v4()),
            executed_at: Utc::now(),
            executor: executor.into(),
            policy,
            dry_run,
            total_providers: decisions.len() as u32,
            affected_providers: summary.affected(),
            decisions,
            summary,
        }
    }
}

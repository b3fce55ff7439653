//! Scheduling policy abstraction.
//!
//! A policy turns one provider snapshot into a [`Suggestion`]. The bandit
//! and the rule policy are two implementations of [`SchedulingPolicy`];
//! the caller picks one per cycle with [`PolicyKind`].

use serde::{Deserialize, Serialize};

use super::circuit_breaker::CircuitHealth;
use super::settings::ScheduleSettings;
use super::types::{DailyTrend, FusedMetrics, MultiWindowMetrics, ScheduleAction};
use crate::storage::Provider;

/// Which policy a cycle runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// UCB1 + epsilon-greedy bandit over fused multi-window metrics
    #[default]
    Bandit,
    /// Tiered thresholds over today's metrics
    Rule,
}

impl PolicyKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Bandit => "bandit",
            PolicyKind::Rule => "rule",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bandit" | "mab" => Ok(PolicyKind::Bandit),
            "rule" | "rules" => Ok(PolicyKind::Rule),
            _ => Err(format!("Unknown scheduling policy: {}", s)),
        }
    }
}

/// Everything a policy knows about one provider for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    /// Current provider record
    pub provider: Provider,
    /// Circuit health at query time
    pub health: CircuitHealth,
    /// Signal to act on
    pub signal: FusedMetrics,
    /// Window breakdown, when the signal was fused from windows
    pub windows: Option<MultiWindowMetrics>,
    /// Day-over-day trend, when the signal is a daily one
    pub trend: Option<DailyTrend>,
}

/// Pool-wide facts shared by every decision of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolContext {
    /// Requests summed across all providers
    pub total_requests: u64,
}

impl PoolContext {
    /// Build from the snapshots of a cycle.
    pub fn from_snapshots(snapshots: &[ProviderSnapshot]) -> Self {
        Self {
            total_requests: snapshots.iter().map(|s| s.signal.requests).sum(),
        }
    }
}

/// A policy's raw output for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// Provider identifier
    pub provider_id: String,
    /// Suggested weight (0 isolates the provider)
    pub weight: u32,
    /// Suggested priority
    pub priority: u32,
    /// Outcome class
    pub action: ScheduleAction,
    /// Human-readable reason
    pub reason: String,
    /// Confidence (0-100)
    pub confidence: u8,
    /// Whether the suggestion exists to gather data
    pub is_exploration: bool,
    /// UCB1 value, `f64::INFINITY` for untried providers
    pub ucb_value: Option<f64>,
}

/// A scheduling strategy.
pub trait SchedulingPolicy: Send + Sync {
    /// Which policy this is.
    fn kind(&self) -> PolicyKind;

    /// Suggest a new state for one provider.
    fn decide(
        &self,
        snapshot: &ProviderSnapshot,
        pool: &PoolContext,
        settings: &ScheduleSettings,
    ) -> Suggestion;

    /// Suggest new states for a whole pool, in snapshot order.
    fn decide_all(
        &self,
        snapshots: &[ProviderSnapshot],
        settings: &ScheduleSettings,
    ) -> Vec<Suggestion> {
        let pool = PoolContext::from_snapshots(snapshots);
        snapshots
            .iter()
            .map(|snapshot| self.decide(snapshot, &pool, settings))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_kind_parsing() {
        assert_eq!("bandit".parse::<PolicyKind>().unwrap(), PolicyKind::Bandit);
        assert_eq!("MAB".parse::<PolicyKind>().unwrap(), PolicyKind::Bandit);
        assert_eq!("rule".parse::<PolicyKind>().unwrap(), PolicyKind::Rule);
        assert!("random".parse::<PolicyKind>().is_err());
        assert_eq!(PolicyKind::default(), PolicyKind::Bandit);
    }

    #[test]
    fn test_pool_context_sums_requests() {
        let snapshot = |requests| ProviderSnapshot {
            provider: Provider::new("p", 10, 1),
            health: CircuitHealth::default(),
            signal: FusedMetrics {
                requests,
                ..Default::default()
            },
            windows: None,
            trend: None,
        };
        let pool = PoolContext::from_snapshots(&[snapshot(10), snapshot(32)]);
        assert_eq!(pool.total_requests, 42);
    }
}

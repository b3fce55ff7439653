//! Rule-based scheduling policy.
//!
//! A coarse, discrete alternative to the bandit that acts on today's
//! metrics. It has no exploration and no per-cycle rate limit, which makes
//! its output easy to reason about in a dry-run preview.

use super::circuit_breaker::CircuitState;
use super::policy::{PolicyKind, PoolContext, ProviderSnapshot, SchedulingPolicy, Suggestion};
use super::scoring::PerformanceScorer;
use super::settings::ScheduleSettings;
use super::types::{DailyTrend, ScheduleAction};
use crate::storage::{MAX_WEIGHT, MIN_WEIGHT};

/// Below this confidence the rules keep the provider as is.
const MIN_CONFIDENCE: u8 = 50;
/// Score above which a provider off its baseline is restored.
const RECOVER_SCORE: f64 = 80.0;
/// Score above which a provider is promoted.
const PROMOTE_SCORE: f64 = 85.0;
/// Score below which a provider is demoted.
const DEMOTE_SCORE: f64 = 60.0;

const PROMOTE_FACTOR: f64 = 1.2;
const DEMOTE_FACTOR: f64 = 0.8;
const CIRCUIT_PENALTY_FACTOR: f64 = 0.7;

/// Threshold-based scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleScheduler;

impl RuleScheduler {
    /// Create a rule scheduler.
    pub fn new() -> Self {
        Self
    }
}

fn scale(weight: u32, factor: f64) -> u32 {
    ((f64::from(weight) * factor).round() as u32).clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// Short day-over-day note appended to reasons.
fn trend_note(trend: Option<&DailyTrend>) -> String {
    match trend {
        Some(t) => format!(
            "; vs yesterday: requests {:+.0}%, error rate {}, latency {}",
            t.requests.change * 100.0,
            if t.error_rate.improving { "improving" } else { "not improving" },
            if t.avg_response_time.improving { "improving" } else { "not improving" },
        ),
        None => String::new(),
    }
}

impl SchedulingPolicy for RuleScheduler {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Rule
    }

    fn decide(
        &self,
        snapshot: &ProviderSnapshot,
        _pool: &PoolContext,
        settings: &ScheduleSettings,
    ) -> Suggestion {
        let provider = &snapshot.provider;
        let score = snapshot.signal.score;
        let confidence = PerformanceScorer::confidence(
            snapshot.signal.requests,
            u64::from(settings.min_sample_size),
        );
        let note = trend_note(snapshot.trend.as_ref());

        let build = |weight, priority, action, reason: String| Suggestion {
            provider_id: provider.id.clone(),
            weight,
            priority,
            action,
            reason,
            confidence,
            is_exploration: false,
            ucb_value: None,
        };

        if confidence < MIN_CONFIDENCE {
            return build(
                provider.weight,
                provider.priority,
                ScheduleAction::Maintain,
                format!(
                    "Low confidence ({}%) with {} requests today, keeping current settings",
                    confidence, snapshot.signal.requests
                ),
            );
        }

        let circuit_open = snapshot.health.circuit_state == CircuitState::Open;
        if circuit_open {
            return build(
                scale(provider.weight, CIRCUIT_PENALTY_FACTOR),
                provider.priority.saturating_add(2),
                ScheduleAction::CircuitPenalty,
                format!(
                    "Circuit open (error rate {:.1}%), reducing traffic",
                    snapshot.signal.error_rate * 100.0
                ),
            );
        }

        let base_weight = provider.effective_base_weight();
        let base_priority = provider.effective_base_priority();
        let below_baseline = provider.weight < base_weight || provider.priority > base_priority;
        if score > RECOVER_SCORE && below_baseline {
            return build(
                base_weight,
                base_priority,
                ScheduleAction::Recover,
                format!("Performance recovered (score {:.1}), restoring baseline{}", score, note),
            );
        }

        if score > PROMOTE_SCORE {
            return build(
                scale(provider.weight, PROMOTE_FACTOR),
                provider.priority.saturating_sub(1),
                ScheduleAction::Promote,
                format!("Excellent performance (score {:.1}){}", score, note),
            );
        }

        if score < DEMOTE_SCORE {
            return build(
                scale(provider.weight, DEMOTE_FACTOR),
                provider.priority.saturating_add(1),
                ScheduleAction::Demote,
                format!("Poor performance (score {:.1}){}", score, note),
            );
        }

        build(
            provider.weight,
            provider.priority,
            ScheduleAction::Maintain,
            format!("Performance within normal range (score {:.1}){}", score, note),
        )
    }
}

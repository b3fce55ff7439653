//! UCB1 + epsilon-greedy bandit policy.
//!
//! Each enabled provider is an arm. The fused multi-window score is the
//! observed reward and UCB1 adds an uncertainty bonus for rarely used
//! providers. Suggestions are evaluated in a fixed precedence:
//!
//! 1. Open circuit: isolate (weight 0, priority 999)
//! 2. Half-open circuit: cautious re-entry at a fraction of the baseline
//! 3. Too few samples: exploration allowance at half the baseline
//! 4. Otherwise a score tier, rate-limited against the current weight
//!
//! Once per cycle the policy also flips an epsilon coin. On heads, the
//! highest-UCB provider that would otherwise be demoted is held where it is
//! so it keeps receiving traffic.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::circuit_breaker::CircuitState;
use super::policy::{PolicyKind, PoolContext, ProviderSnapshot, SchedulingPolicy, Suggestion};
use super::settings::ScheduleSettings;
use super::types::ScheduleAction;
use crate::storage::{MAX_WEIGHT, MIN_WEIGHT};

/// Priority given to providers with an open circuit.
pub const ISOLATED_PRIORITY: u32 = 999;

/// Score tier of a sufficiently sampled provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    /// Score >= 85
    Excellent,
    /// 70 <= score < 85
    Baseline,
    /// 50 <= score < 70
    Degraded,
    /// Score < 50
    Poor,
}

impl Tier {
    fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Tier::Excellent
        } else if score >= 70.0 {
            Tier::Baseline
        } else if score >= 50.0 {
            Tier::Degraded
        } else {
            Tier::Poor
        }
    }
}

/// Action implied by the direction of a weight change.
fn classify(current: u32, suggested: u32, unchanged: ScheduleAction) -> ScheduleAction {
    match suggested.cmp(&current) {
        std::cmp::Ordering::Greater => ScheduleAction::Promote,
        std::cmp::Ordering::Less => ScheduleAction::Demote,
        std::cmp::Ordering::Equal => unchanged,
    }
}

/// Multi-armed bandit scheduler.
#[derive(Debug)]
pub struct BanditScheduler {
    rng: Mutex<StdRng>,
}

impl Default for BanditScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl BanditScheduler {
    /// Create a bandit seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a bandit with a fixed seed, for reproducible exploration.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// UCB1 value of an arm.
    ///
    /// Untried arms (`requests == 0`) are infinitely attractive.
    pub fn ucb_value(score: f64, requests: u64, total_requests: u64) -> f64 {
        if requests == 0 {
            return f64::INFINITY;
        }
        let total = total_requests.max(requests) as f64;
        score / 100.0 + (2.0 * total.ln() / requests as f64).sqrt()
    }

    /// Confidence that the fused signal is trustworthy.
    ///
    /// 0 without data, 100 from twice the minimum sample, linear in between.
    pub fn confidence(requests: u64, min_sample_size: u32) -> u8 {
        if requests == 0 {
            return 0;
        }
        let full = u64::from(min_sample_size.max(1)) * 2;
        if requests >= full {
            100
        } else {
            (requests as f64 / full as f64 * 100.0).round() as u8
        }
    }

    /// Roll the epsilon coin for this cycle.
    fn should_explore(&self, exploration_rate: u32) -> bool {
        if exploration_rate == 0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen::<f64>() * 100.0 < f64::from(exploration_rate)
    }

    fn tiered(
        snapshot: &ProviderSnapshot,
        settings: &ScheduleSettings,
    ) -> (u32, u32, ScheduleAction, String) {
        let provider = &snapshot.provider;
        let score = snapshot.signal.score;
        let current = i64::from(provider.weight);
        let base_weight = i64::from(provider.effective_base_weight());
        let base_priority = provider.effective_base_priority();
        let max_adjust = i64::from(settings.max_weight_adjustment_percent);

        let tier = Tier::from_score(score);
        let (target, priority) = match tier {
            Tier::Excellent => (
                current + base_weight * max_adjust / 100,
                base_priority.saturating_sub(1),
            ),
            Tier::Baseline => (base_weight, base_priority),
            Tier::Degraded => (
                current - base_weight * max_adjust / 200,
                base_priority.saturating_add(1),
            ),
            Tier::Poor => (
                current - base_weight * max_adjust / 100,
                base_priority.saturating_add(2),
            ),
        };

        // Per-cycle rate limit against the current weight
        let max_step = current * max_adjust / 100;
        let delta = (target - current).clamp(-max_step, max_step);
        let weight = (current + delta).clamp(i64::from(MIN_WEIGHT), i64::from(MAX_WEIGHT)) as u32;

        let off_baseline = provider.weight != provider.effective_base_weight()
            || provider.priority != base_priority;

        let unchanged = if tier == Tier::Baseline && off_baseline {
            ScheduleAction::Recover
        } else {
            ScheduleAction::Maintain
        };
        let action = classify(provider.weight, weight, unchanged);

        let reason = match tier {
            Tier::Excellent => format!("Excellent performance (score {:.1})", score),
            Tier::Baseline => format!("Normal performance (score {:.1}), back to baseline", score),
            Tier::Degraded => format!("Degraded performance (score {:.1})", score),
            Tier::Poor => format!("Poor performance (score {:.1})", score),
        };

        (weight, priority, action, reason)
    }
}

impl SchedulingPolicy for BanditScheduler {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Bandit
    }

    fn decide(
        &self,
        snapshot: &ProviderSnapshot,
        pool: &PoolContext,
        settings: &ScheduleSettings,
    ) -> Suggestion {
        let provider = &snapshot.provider;
        let signal = &snapshot.signal;
        let base_weight = provider.effective_base_weight();
        let base_priority = provider.effective_base_priority();

        let ucb_value = Self::ucb_value(signal.score, signal.requests, pool.total_requests);
        let confidence = Self::confidence(signal.requests, settings.min_sample_size);

        let build = |weight, priority, action, reason: String, is_exploration| Suggestion {
            provider_id: provider.id.clone(),
            weight,
            priority,
            action,
            reason,
            confidence,
            is_exploration,
            ucb_value: Some(ucb_value),
        };

        match snapshot.health.circuit_state {
            CircuitState::Open => {
                return build(
                    0,
                    ISOLATED_PRIORITY,
                    ScheduleAction::CircuitPenalty,
                    format!(
                        "Circuit open (error rate {:.1}%), provider isolated",
                        signal.error_rate * 100.0
                    ),
                    false,
                );
            }
            CircuitState::HalfOpen => {
                let weight = (u64::from(base_weight)
                    * u64::from(settings.circuit_recovery_weight_percent)
                    / 100)
                    .clamp(u64::from(MIN_WEIGHT), u64::from(MAX_WEIGHT)) as u32;
                return build(
                    weight,
                    base_priority.saturating_add(1),
                    classify(provider.weight, weight, ScheduleAction::Recover),
                    format!(
                        "Circuit half-open, probing at {}% of baseline weight",
                        settings.circuit_recovery_weight_percent
                    ),
                    false,
                );
            }
            CircuitState::Closed => {}
        }

        if signal.requests < u64::from(settings.min_sample_size) {
            let weight = (base_weight / 2).clamp(MIN_WEIGHT, MAX_WEIGHT);
            return build(
                weight,
                provider.priority,
                ScheduleAction::Explore,
                format!(
                    "Insufficient samples ({}/{}), exploring",
                    signal.requests, settings.min_sample_size
                ),
                true,
            );
        }

        let (weight, priority, action, reason) = Self::tiered(snapshot, settings);
        build(weight, priority, action, reason, false)
    }

    fn decide_all(
        &self,
        snapshots: &[ProviderSnapshot],
        settings: &ScheduleSettings,
    ) -> Vec<Suggestion> {
        let pool = PoolContext::from_snapshots(snapshots);
        let mut suggestions: Vec<Suggestion> = snapshots
            .iter()
            .map(|snapshot| self.decide(snapshot, &pool, settings))
            .collect();

        if !self.should_explore(settings.exploration_rate) {
            return suggestions;
        }

        let candidate = snapshots
            .iter()
            .zip(suggestions.iter())
            .enumerate()
            .filter(|(_, (snapshot, suggestion))| {
                snapshot.health.circuit_state == CircuitState::Closed
                    && suggestion.action == ScheduleAction::Demote
            })
            .max_by(|(_, (_, a)), (_, (_, b))| {
                a.ucb_value
                    .unwrap_or(f64::NEG_INFINITY)
                    .total_cmp(&b.ucb_value.unwrap_or(f64::NEG_INFINITY))
            })
            .map(|(index, _)| index);

        if let Some(index) = candidate {
            let provider = &snapshots[index].provider;
            debug!(
                provider_id = %provider.id,
                ucb_value = ?suggestions[index].ucb_value,
                "Epsilon exploration holds provider at current weight"
            );
            let held = &mut suggestions[index];
            held.weight = provider.weight;
            held.priority = provider.priority;
            held.action = ScheduleAction::Explore;
            held.is_exploration = true;
            held.reason = format!(
                "Exploring: held at weight {} instead of demoting ({})",
                provider.weight, held.reason
            );
        }

        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::circuit_breaker::CircuitHealth;
    use crate::scheduling::types::FusedMetrics;
    use crate::storage::Provider;

    fn settings(exploration_rate: u32) -> ScheduleSettings {
        ScheduleSettings {
            exploration_rate,
            ..Default::default()
        }
    }

    fn snapshot(
        provider: Provider,
        score: f64,
        requests: u64,
        state: CircuitState,
    ) -> ProviderSnapshot {
        ProviderSnapshot {
            provider,
            health: CircuitHealth {
                circuit_state: state,
                ..Default::default()
            },
            signal: FusedMetrics {
                score,
                requests,
                error_rate: 0.02,
                avg_response_time: 400.0,
            },
            windows: None,
            trend: None,
        }
    }

    fn decide_one(snapshot: &ProviderSnapshot) -> Suggestion {
        let bandit = BanditScheduler::with_seed(7);
        let pool = PoolContext {
            total_requests: snapshot.signal.requests * 3,
        };
        bandit.decide(snapshot, &pool, &settings(0))
    }

    #[test]
    fn test_excellent_provider_is_promoted_by_one_step() {
        let provider = Provider::new("p1", 10, 2).with_baseline(10, 2);
        let s = decide_one(&snapshot(provider, 90.0, 20, CircuitState::Closed));

        assert_eq!(s.weight, 11);
        assert_eq!(s.priority, 1);
        assert_eq!(s.action, ScheduleAction::Promote);
        assert_eq!(s.confidence, 100);
        assert!(!s.is_exploration);
    }

    #[test]
    fn test_open_circuit_isolates_provider() {
        let provider = Provider::new("p1", 40, 1).with_baseline(40, 1);
        let s = decide_one(&snapshot(provider, 99.0, 500, CircuitState::Open));

        assert_eq!(s.weight, 0);
        assert_eq!(s.priority, ISOLATED_PRIORITY);
        assert_eq!(s.action, ScheduleAction::CircuitPenalty);
        assert!(s.reason.contains("2.0%"));
    }

    #[test]
    fn test_half_open_uses_recovery_fraction() {
        let provider = Provider::new("p1", 3, 4).with_baseline(30, 2);
        let s = decide_one(&snapshot(provider, 40.0, 50, CircuitState::HalfOpen));

        assert_eq!(s.weight, 15);
        assert_eq!(s.priority, 3);
        assert_eq!(s.action, ScheduleAction::Promote);
    }

    #[test]
    fn test_half_open_action_follows_weight_direction() {
        let cut = Provider::new("p1", 40, 2).with_baseline(40, 2);
        let s = decide_one(&snapshot(cut, 40.0, 50, CircuitState::HalfOpen));
        assert_eq!(s.weight, 20);
        assert_eq!(s.action, ScheduleAction::Demote);

        let reentry = Provider::new("p1", 1, 999).with_baseline(40, 2);
        let s = decide_one(&snapshot(reentry, 40.0, 50, CircuitState::HalfOpen));
        assert_eq!(s.weight, 20);
        assert_eq!(s.action, ScheduleAction::Promote);

        let steady = Provider::new("p1", 20, 3).with_baseline(40, 2);
        let s = decide_one(&snapshot(steady, 40.0, 50, CircuitState::HalfOpen));
        assert_eq!(s.weight, 20);
        assert_eq!(s.action, ScheduleAction::Recover);
    }

    #[test]
    fn test_half_open_weight_never_below_one() {
        let provider = Provider::new("p1", 1, 1).with_baseline(1, 1);
        let s = decide_one(&snapshot(provider, 40.0, 50, CircuitState::HalfOpen));
        assert_eq!(s.weight, 1);
    }

    #[test]
    fn test_small_sample_explores_at_half_baseline() {
        let provider = Provider::new("p1", 10, 3).with_baseline(10, 3);
        let s = decide_one(&snapshot(provider, 20.0, 3, CircuitState::Closed));

        assert_eq!(s.weight, 5);
        assert_eq!(s.priority, 3);
        assert_eq!(s.action, ScheduleAction::Explore);
        assert!(s.is_exploration);
        assert_eq!(s.confidence, 15);
    }

    #[test]
    fn test_normal_tier_recovers_priority() {
        let provider = Provider::new("p1", 10, 3).with_baseline(10, 1);
        let s = decide_one(&snapshot(provider, 75.0, 30, CircuitState::Closed));

        assert_eq!(s.weight, 10);
        assert_eq!(s.priority, 1);
        assert_eq!(s.action, ScheduleAction::Recover);
    }

    #[test]
    fn test_normal_tier_at_baseline_maintains() {
        let provider = Provider::new("p1", 10, 1).with_baseline(10, 1);
        let s = decide_one(&snapshot(provider, 75.0, 30, CircuitState::Closed));
        assert_eq!(s.action, ScheduleAction::Maintain);
    }

    #[test]
    fn test_degraded_and_poor_tiers() {
        let provider = Provider::new("p1", 50, 2).with_baseline(50, 2);
        let degraded = decide_one(&snapshot(provider.clone(), 60.0, 30, CircuitState::Closed));
        assert_eq!(degraded.weight, 48);
        assert_eq!(degraded.priority, 3);
        assert_eq!(degraded.action, ScheduleAction::Demote);

        let poor = decide_one(&snapshot(provider, 30.0, 30, CircuitState::Closed));
        assert_eq!(poor.weight, 45);
        assert_eq!(poor.priority, 4);
        assert_eq!(poor.action, ScheduleAction::Demote);
    }

    #[test]
    fn test_missing_baseline_uses_current_values() {
        let provider = Provider::new("p1", 20, 2);
        let s = decide_one(&snapshot(provider, 90.0, 30, CircuitState::Closed));
        assert_eq!(s.weight, 22);
        assert_eq!(s.priority, 1);
    }

    #[test]
    fn test_change_never_exceeds_rate_limit() {
        let bandit = BanditScheduler::with_seed(1);
        for max_adjust in [1_u32, 10, 25, 50] {
            let settings = ScheduleSettings {
                exploration_rate: 0,
                max_weight_adjustment_percent: max_adjust,
                ..Default::default()
            };
            for weight in [1_u32, 5, 9, 33, 70, 100] {
                for base in [1_u32, 10, 60, 100] {
                    for score in [10.0, 55.0, 75.0, 95.0] {
                        let provider = Provider::new("p", weight, 5).with_baseline(base, 5);
                        let snap = snapshot(provider, score, 100, CircuitState::Closed);
                        let pool = PoolContext { total_requests: 300 };
                        let s = bandit.decide(&snap, &pool, &settings);

                        let limit = i64::from(weight * max_adjust / 100);
                        let delta = (i64::from(s.weight) - i64::from(weight)).abs();
                        assert!(
                            delta <= limit,
                            "weight {} base {} score {} adj {} moved by {}",
                            weight,
                            base,
                            score,
                            max_adjust,
                            delta
                        );
                        assert!((1..=100).contains(&s.weight));
                    }
                }
            }
        }
    }

    #[test]
    fn test_ucb_value() {
        assert!(BanditScheduler::ucb_value(90.0, 0, 100).is_infinite());

        let ucb = BanditScheduler::ucb_value(80.0, 10, 100);
        let expected = 0.8 + (2.0 * 100_f64.ln() / 10.0).sqrt();
        assert!((ucb - expected).abs() < 1e-12);

        // Rarely used arms get a larger bonus
        assert!(
            BanditScheduler::ucb_value(80.0, 5, 100) > BanditScheduler::ucb_value(80.0, 50, 100)
        );
    }

    #[test]
    fn test_confidence_ramp() {
        assert_eq!(BanditScheduler::confidence(0, 10), 0);
        assert_eq!(BanditScheduler::confidence(5, 10), 25);
        assert_eq!(BanditScheduler::confidence(10, 10), 50);
        assert_eq!(BanditScheduler::confidence(20, 10), 100);
        assert_eq!(BanditScheduler::confidence(1_000, 10), 100);
    }

    #[test]
    fn test_epsilon_holds_best_demotion_candidate() {
        let bandit = BanditScheduler::with_seed(42);
        let arm = |id: &str, score, requests| {
            let provider = Provider::new(id, 50, 1).with_baseline(50, 1);
            snapshot(provider, score, requests, CircuitState::Closed)
        };
        let snapshots = vec![arm("good", 95.0, 400), arm("busy", 40.0, 400), arm("rare", 40.0, 20)];

        let suggestions = bandit.decide_all(&snapshots, &settings(100));

        assert_eq!(suggestions[0].action, ScheduleAction::Promote);
        assert_eq!(suggestions[1].action, ScheduleAction::Demote);
        // Fewer samples, higher UCB
        assert_eq!(suggestions[2].action, ScheduleAction::Explore);
        assert_eq!(suggestions[2].weight, 50);
        assert_eq!(suggestions[2].priority, 1);
        assert!(suggestions[2].is_exploration);
    }

    #[test]
    fn test_zero_epsilon_never_explores() {
        let bandit = BanditScheduler::new();
        let snapshots = vec![snapshot(
            Provider::new("p", 50, 1).with_baseline(50, 1),
            30.0,
            400,
            CircuitState::Closed,
        )];

        for _ in 0..50 {
            let suggestions = bandit.decide_all(&snapshots, &settings(0));
            assert_eq!(suggestions[0].action, ScheduleAction::Demote);
        }
    }

    #[test]
    fn test_epsilon_skips_open_circuits() {
        let bandit = BanditScheduler::with_seed(3);
        let snapshots = vec![snapshot(
            Provider::new("p", 50, 1).with_baseline(50, 1),
            30.0,
            400,
            CircuitState::Open,
        )];
        let suggestions = bandit.decide_all(&snapshots, &settings(100));
        assert_eq!(suggestions[0].action, ScheduleAction::CircuitPenalty);
    }
}

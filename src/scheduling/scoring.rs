//! Performance scoring for providers.
//!
//! Pure functions shared by both scheduling policies:
//! - [`PerformanceScorer::score`]: error rate and latency to a 0-100 score
//! - [`PerformanceScorer::confidence`]: sample size to a 0-100 confidence level
//! - [`PerformanceScorer::trend`]: period-over-period change

use serde::{Deserialize, Serialize};

/// Points available for reliability (error rate).
const RELIABILITY_POINTS: f64 = 60.0;
/// Points available for speed (latency).
const SPEED_POINTS: f64 = 40.0;
/// Response time at which the speed term reaches zero.
const LATENCY_FLOOR_MS: f64 = 10_000.0;

/// Period-over-period change of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// Relative change, `(current - previous) / previous`.
    pub change: f64,
    /// Whether the change is an improvement for this metric.
    pub improving: bool,
}

/// Stateless scoring functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceScorer;

impl PerformanceScorer {
    /// Score a provider from its error rate (0-1) and mean latency (ms).
    ///
    /// Reliability contributes up to 60 points, speed up to 40. Response
    /// times of 10s or more contribute nothing. Rounded to one decimal.
    pub fn score(error_rate: f64, avg_response_time_ms: f64) -> f64 {
        let reliability = ((1.0 - error_rate) * RELIABILITY_POINTS).clamp(0.0, RELIABILITY_POINTS);
        let latency_ratio = (avg_response_time_ms.max(0.0) / LATENCY_FLOOR_MS).min(1.0);
        let speed = ((1.0 - latency_ratio) * SPEED_POINTS).clamp(0.0, SPEED_POINTS);

        round_one_decimal(reliability + speed)
    }

    /// Confidence (0-100) that a sample of `sample_size` calls is representative.
    ///
    /// Steps to 50/80/100 at one, two and five times `min_size`, and ramps
    /// linearly from 0 to 50 below `min_size`.
    pub fn confidence(sample_size: u64, min_size: u64) -> u8 {
        if sample_size == 0 {
            return 0;
        }
        let min_size = min_size.max(1);

        if sample_size >= min_size.saturating_mul(5) {
            100
        } else if sample_size >= min_size.saturating_mul(2) {
            80
        } else if sample_size >= min_size {
            50
        } else {
            (sample_size as f64 / min_size as f64 * 50.0).round() as u8
        }
    }

    /// Relative change between two periods.
    ///
    /// With `previous == 0` the change is 1 when `current > 0`, else 0.
    /// `reverse` marks metrics where lower is better (error rate, latency).
    pub fn trend(current: f64, previous: f64, reverse: bool) -> Trend {
        let change = if previous == 0.0 {
            if current > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (current - previous) / previous
        };

        let improving = if reverse { change < 0.0 } else { change > 0.0 };

        Trend { change, improving }
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_score() {
        assert_eq!(PerformanceScorer::score(0.0, 0.0), 100.0);
    }

    #[test]
    fn test_worst_score() {
        assert_eq!(PerformanceScorer::score(1.0, 10_000.0), 0.0);
        assert_eq!(PerformanceScorer::score(1.0, 45_000.0), 0.0);
    }

    #[test]
    fn test_score_components() {
        // 5% errors: 57 reliability; 1s latency: 36 speed
        assert_eq!(PerformanceScorer::score(0.05, 1000.0), 93.0);
        // Slow but reliable
        assert_eq!(PerformanceScorer::score(0.0, 12_000.0), 60.0);
        // Fast but failing
        assert_eq!(PerformanceScorer::score(1.0, 0.0), 40.0);
    }

    #[test]
    fn test_score_rounds_to_one_decimal() {
        // 0.0333 errors -> 58.002; 333ms -> 38.668
        let score = PerformanceScorer::score(0.0333, 333.0);
        assert_eq!(score, 96.7);
    }

    #[test]
    fn test_confidence_steps() {
        assert_eq!(PerformanceScorer::confidence(0, 10), 0);
        assert_eq!(PerformanceScorer::confidence(5, 10), 25);
        assert_eq!(PerformanceScorer::confidence(10, 10), 50);
        assert_eq!(PerformanceScorer::confidence(20, 10), 80);
        assert_eq!(PerformanceScorer::confidence(49, 10), 80);
        assert_eq!(PerformanceScorer::confidence(50, 10), 100);
    }

    #[test]
    fn test_confidence_is_monotonic() {
        for min in [1_u64, 3, 10, 25] {
            let mut previous = 0;
            for sample in 0..200 {
                let current = PerformanceScorer::confidence(sample, min);
                assert!(
                    current >= previous,
                    "confidence dropped at sample {} (min {})",
                    sample,
                    min
                );
                previous = current;
            }
        }
    }

    #[test]
    fn test_trend() {
        let t = PerformanceScorer::trend(150.0, 100.0, false);
        assert!((t.change - 0.5).abs() < f64::EPSILON);
        assert!(t.improving);

        let t = PerformanceScorer::trend(0.02, 0.04, true);
        assert!((t.change + 0.5).abs() < f64::EPSILON);
        assert!(t.improving);

        let t = PerformanceScorer::trend(0.06, 0.04, true);
        assert!(!t.improving);
    }

    #[test]
    fn test_trend_from_zero() {
        assert_eq!(PerformanceScorer::trend(5.0, 0.0, false).change, 1.0);
        assert_eq!(PerformanceScorer::trend(0.0, 0.0, false).change, 0.0);
        assert!(!PerformanceScorer::trend(0.0, 0.0, false).improving);
    }
}

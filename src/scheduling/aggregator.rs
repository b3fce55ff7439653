//! Telemetry aggregation for scheduling cycles.
//!
//! Builds the [`ProviderSnapshot`]s a policy decides on:
//! - bandit cycles get three lookback windows fused into one signal
//! - rule cycles get today's metrics plus a trend against yesterday
//!
//! Any telemetry failure aborts the snapshot with
//! [`SchedulerError::TelemetryUnavailable`] so no provider is written on
//! partial data.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tracing::debug;

use super::circuit_breaker::ProviderCircuitBreaker;
use super::policy::ProviderSnapshot;
use super::scoring::PerformanceScorer;
use super::settings::ScheduleSettings;
use super::types::{DailyTrend, FusedMetrics, MultiWindowMetrics, WindowMetrics};
use crate::error::{SchedulerError, SchedulerResult, StorageError};
use crate::storage::{Provider, TelemetryStore};

/// Decay weight of the short window.
pub const SHORT_DECAY: f64 = 0.6;
/// Decay weight of the medium window.
pub const MEDIUM_DECAY: f64 = 0.3;
/// Decay weight of the long window.
pub const LONG_DECAY: f64 = 0.1;

/// Collects telemetry and circuit health into per-provider snapshots.
pub struct WindowAggregator {
    telemetry: Arc<dyn TelemetryStore>,
    breaker: Arc<ProviderCircuitBreaker>,
}

impl WindowAggregator {
    /// Create an aggregator over a telemetry store and the shared breaker.
    pub fn new(telemetry: Arc<dyn TelemetryStore>, breaker: Arc<ProviderCircuitBreaker>) -> Self {
        Self { telemetry, breaker }
    }

    /// Blend three windows into one signal.
    ///
    /// Each window's share of the requests is multiplied by its decay weight
    /// and the products are renormalized, so empty windows hand their weight
    /// to windows that have data.
    pub fn fuse(
        short: &WindowMetrics,
        medium: &WindowMetrics,
        long: &WindowMetrics,
    ) -> FusedMetrics {
        let total = short.requests + medium.requests + long.requests;
        if total == 0 {
            return FusedMetrics {
                score: PerformanceScorer::score(0.0, 0.0),
                requests: 0,
                error_rate: 0.0,
                avg_response_time: 0.0,
            };
        }

        let windows = [(short, SHORT_DECAY), (medium, MEDIUM_DECAY), (long, LONG_DECAY)];
        let decayed: Vec<f64> = windows
            .iter()
            .map(|(w, decay)| w.requests as f64 / total as f64 * decay)
            .collect();
        let norm: f64 = decayed.iter().sum();

        let (error_rate, avg_response_time) = windows.iter().zip(decayed.iter()).fold(
            (0.0, 0.0),
            |(err, lat), ((w, _), weight)| {
                let share = weight / norm;
                (err + w.error_rate * share, lat + w.avg_response_time * share)
            },
        );

        FusedMetrics {
            score: PerformanceScorer::score(error_rate, avg_response_time),
            requests: total,
            error_rate,
            avg_response_time,
        }
    }

    async fn window(&self, provider_id: &str, minutes: u32) -> SchedulerResult<WindowMetrics> {
        self.telemetry
            .windowed_stats(provider_id, minutes)
            .await
            .map(WindowMetrics::from)
            .map_err(|e| telemetry_error(provider_id, e))
    }

    async fn day(&self, provider_id: &str, day: NaiveDate) -> SchedulerResult<WindowMetrics> {
        self.telemetry
            .daily_stats(provider_id, day)
            .await
            .map(WindowMetrics::from)
            .map_err(|e| telemetry_error(provider_id, e))
    }

    /// Multi-window snapshots for the bandit policy.
    pub async fn window_snapshots(
        &self,
        providers: &[Provider],
        settings: &ScheduleSettings,
    ) -> SchedulerResult<Vec<ProviderSnapshot>> {
        let mut snapshots = Vec::with_capacity(providers.len());

        for provider in providers {
            let (short, medium, long) = tokio::try_join!(
                self.window(&provider.id, settings.short_term_window_minutes),
                self.window(&provider.id, settings.medium_term_window_minutes),
                self.window(&provider.id, settings.long_term_window_minutes),
            )?;
            let weighted = Self::fuse(&short, &medium, &long);
            let health = self.breaker.health(&provider.id).await;

            debug!(
                provider_id = %provider.id,
                score = weighted.score,
                requests = weighted.requests,
                circuit_state = %health.circuit_state,
                "Fused provider metrics"
            );

            snapshots.push(ProviderSnapshot {
                provider: provider.clone(),
                health,
                signal: weighted,
                windows: Some(MultiWindowMetrics {
                    short,
                    medium,
                    long,
                    weighted,
                }),
                trend: None,
            });
        }

        Ok(snapshots)
    }

    /// Today-versus-yesterday snapshots for the rule policy.
    pub async fn daily_snapshots(
        &self,
        providers: &[Provider],
        today: NaiveDate,
    ) -> SchedulerResult<Vec<ProviderSnapshot>> {
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        let mut snapshots = Vec::with_capacity(providers.len());

        for provider in providers {
            let (current, previous) = tokio::try_join!(
                self.day(&provider.id, today),
                self.day(&provider.id, yesterday),
            )?;
            let health = self.breaker.health(&provider.id).await;

            let trend = DailyTrend {
                yesterday: previous,
                requests: PerformanceScorer::trend(
                    current.requests as f64,
                    previous.requests as f64,
                    false,
                ),
                error_rate: PerformanceScorer::trend(current.error_rate, previous.error_rate, true),
                avg_response_time: PerformanceScorer::trend(
                    current.avg_response_time,
                    previous.avg_response_time,
                    true,
                ),
            };

            snapshots.push(ProviderSnapshot {
                provider: provider.clone(),
                health,
                signal: FusedMetrics {
                    score: PerformanceScorer::score(current.error_rate, current.avg_response_time),
                    requests: current.requests,
                    error_rate: current.error_rate,
                    avg_response_time: current.avg_response_time,
                },
                windows: None,
                trend: Some(trend),
            });
        }

        Ok(snapshots)
    }
}

fn telemetry_error(provider_id: &str, error: StorageError) -> SchedulerError {
    SchedulerError::TelemetryUnavailable {
        provider_id: provider_id.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::circuit_breaker::CircuitState;
    use crate::storage::{MockTelemetryStore, WindowStats};

    fn window(requests: u64, error_rate: f64, avg_response_time: f64) -> WindowMetrics {
        WindowMetrics {
            requests,
            error_rate,
            avg_response_time,
            cost: 0.0,
        }
    }

    #[test]
    fn test_fuse_without_traffic() {
        let empty = WindowMetrics::default();
        let fused = WindowAggregator::fuse(&empty, &empty, &empty);
        assert_eq!(fused.requests, 0);
        assert_eq!(fused.error_rate, 0.0);
        assert_eq!(fused.avg_response_time, 0.0);
        assert_eq!(fused.score, 100.0);
    }

    #[test]
    fn test_fuse_renormalizes_empty_windows() {
        let fused = WindowAggregator::fuse(
            &window(0, 0.0, 0.0),
            &window(100, 0.1, 1000.0),
            &window(300, 0.2, 2000.0),
        );

        // Medium and long carry equal decayed weight
        assert_eq!(fused.requests, 400);
        assert!((fused.error_rate - 0.15).abs() < 1e-9);
        assert!((fused.avg_response_time - 1500.0).abs() < 1e-6);
        assert!((fused.score - 85.0).abs() < 0.05);
    }

    #[test]
    fn test_fuse_single_window_passes_through() {
        let fused = WindowAggregator::fuse(
            &window(50, 0.04, 250.0),
            &WindowMetrics::default(),
            &WindowMetrics::default(),
        );
        assert!((fused.error_rate - 0.04).abs() < 1e-9);
        assert!((fused.avg_response_time - 250.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_window_snapshots_use_configured_windows() {
        let mut telemetry = MockTelemetryStore::new();
        telemetry.expect_windowed_stats().returning(|_, minutes| {
            Ok(WindowStats {
                requests: u64::from(minutes),
                cost: 0.0,
                avg_response_time_ms: 100.0,
                error_count: 0,
            })
        });

        let breaker = Arc::new(ProviderCircuitBreaker::default());
        let aggregator = WindowAggregator::new(Arc::new(telemetry), breaker);
        let settings = ScheduleSettings {
            short_term_window_minutes: 5,
            medium_term_window_minutes: 30,
            long_term_window_minutes: 120,
            ..Default::default()
        };

        let snapshots = aggregator
            .window_snapshots(&[Provider::new("p1", 10, 1)], &settings)
            .await
            .unwrap();

        let windows = snapshots[0].windows.unwrap();
        assert_eq!(windows.short.requests, 5);
        assert_eq!(windows.medium.requests, 30);
        assert_eq!(windows.long.requests, 120);
        assert_eq!(snapshots[0].signal.requests, 155);
        assert_eq!(snapshots[0].health.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_telemetry_failure_aborts_snapshot() {
        let mut telemetry = MockTelemetryStore::new();
        telemetry.expect_windowed_stats().returning(|_, _| {
            Err(StorageError::Connection {
                message: "disk I/O error".to_string(),
            })
        });

        let aggregator =
            WindowAggregator::new(Arc::new(telemetry), Arc::new(ProviderCircuitBreaker::default()));
        let err = aggregator
            .window_snapshots(&[Provider::new("p1", 10, 1)], &ScheduleSettings::default())
            .await
            .unwrap_err();

        match err {
            SchedulerError::TelemetryUnavailable { provider_id, message } => {
                assert_eq!(provider_id, "p1");
                assert!(message.contains("disk I/O error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_daily_snapshots_compute_trend() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let mut telemetry = MockTelemetryStore::new();
        telemetry.expect_daily_stats().returning(move |_, day| {
            Ok(if day == today {
                WindowStats {
                    requests: 200,
                    cost: 1.0,
                    avg_response_time_ms: 500.0,
                    error_count: 2,
                }
            } else {
                WindowStats {
                    requests: 100,
                    cost: 0.5,
                    avg_response_time_ms: 1000.0,
                    error_count: 4,
                }
            })
        });

        let aggregator =
            WindowAggregator::new(Arc::new(telemetry), Arc::new(ProviderCircuitBreaker::default()));
        let snapshots = aggregator
            .daily_snapshots(&[Provider::new("p1", 10, 1)], today)
            .await
            .unwrap();

        let snapshot = &snapshots[0];
        assert_eq!(snapshot.signal.requests, 200);
        assert!((snapshot.signal.error_rate - 0.01).abs() < 1e-9);

        let trend = snapshot.trend.unwrap();
        assert_eq!(trend.yesterday.requests, 100);
        assert!((trend.requests.change - 1.0).abs() < 1e-9);
        assert!(trend.error_rate.improving);
        assert!(trend.avg_response_time.improving);
    }
}

//! Scheduling settings.
//!
//! These tunables live in the settings store and are re-read at the start
//! of every cycle, so changes take effect on the next tick. Every write
//! goes through [`ScheduleSettings::apply`], which rejects out-of-range
//! values before anything reaches the store.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// Allowed recurring interval, seconds.
pub const INTERVAL_RANGE: RangeInclusive<u32> = 30..=300;
/// Allowed exploration rate, percent.
pub const EXPLORATION_RANGE: RangeInclusive<u32> = 0..=100;
/// Allowed per-cycle weight adjustment, percent.
pub const MAX_ADJUSTMENT_RANGE: RangeInclusive<u32> = 1..=50;
/// Allowed minimum sample size.
pub const MIN_SAMPLE_RANGE: RangeInclusive<u32> = 1..=100_000;
/// Allowed half-open weight, percent of baseline.
pub const RECOVERY_WEIGHT_RANGE: RangeInclusive<u32> = 1..=100;
/// Allowed half-open success count.
pub const RECOVERY_OBSERVATION_RANGE: RangeInclusive<u32> = 1..=100;
/// Allowed lookback window, minutes (30 days).
pub const WINDOW_RANGE: RangeInclusive<u32> = 1..=43_200;

/// Persisted scheduling tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSettings {
    /// Whether the background scheduler should run
    pub enable_realtime_schedule: bool,
    /// Seconds between background cycles
    pub schedule_interval_seconds: u32,
    /// Epsilon of the bandit, percent
    pub exploration_rate: u32,
    /// Calls needed before a provider's score is trusted
    pub min_sample_size: u32,
    /// Half-open weight as a percent of the baseline weight
    pub circuit_recovery_weight_percent: u32,
    /// Half-open successes needed to close a circuit
    pub circuit_recovery_observation_count: u32,
    /// Largest weight change per cycle, percent of the current weight
    pub max_weight_adjustment_percent: u32,
    /// Short lookback window, minutes
    pub short_term_window_minutes: u32,
    /// Medium lookback window, minutes
    pub medium_term_window_minutes: u32,
    /// Long lookback window, minutes
    pub long_term_window_minutes: u32,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enable_realtime_schedule: false, // Opt-in
            schedule_interval_seconds: 60,
            exploration_rate: 10,
            min_sample_size: 10,
            circuit_recovery_weight_percent: 50,
            circuit_recovery_observation_count: 2,
            max_weight_adjustment_percent: 10,
            short_term_window_minutes: 60,
            medium_term_window_minutes: 360,
            long_term_window_minutes: 1440,
        }
    }
}

/// Partial settings change. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    /// See [`ScheduleSettings::enable_realtime_schedule`]
    pub enable_realtime_schedule: Option<bool>,
    /// See [`ScheduleSettings::schedule_interval_seconds`]
    pub schedule_interval_seconds: Option<u32>,
    /// See [`ScheduleSettings::exploration_rate`]
    pub exploration_rate: Option<u32>,
    /// See [`ScheduleSettings::min_sample_size`]
    pub min_sample_size: Option<u32>,
    /// See [`ScheduleSettings::circuit_recovery_weight_percent`]
    pub circuit_recovery_weight_percent: Option<u32>,
    /// See [`ScheduleSettings::circuit_recovery_observation_count`]
    pub circuit_recovery_observation_count: Option<u32>,
    /// See [`ScheduleSettings::max_weight_adjustment_percent`]
    pub max_weight_adjustment_percent: Option<u32>,
    /// See [`ScheduleSettings::short_term_window_minutes`]
    pub short_term_window_minutes: Option<u32>,
    /// See [`ScheduleSettings::medium_term_window_minutes`]
    pub medium_term_window_minutes: Option<u32>,
    /// See [`ScheduleSettings::long_term_window_minutes`]
    pub long_term_window_minutes: Option<u32>,
}

impl SettingsUpdate {
    /// Whether the update changes anything that affects a running scheduler.
    pub fn is_empty(&self) -> bool {
        *self == SettingsUpdate::default()
    }
}

impl ScheduleSettings {
    /// Check every field against its allowed range.
    pub fn validate(&self) -> SchedulerResult<()> {
        check_range("scheduleIntervalSeconds", self.schedule_interval_seconds, INTERVAL_RANGE)?;
        check_range("explorationRate", self.exploration_rate, EXPLORATION_RANGE)?;
        check_range("minSampleSize", self.min_sample_size, MIN_SAMPLE_RANGE)?;
        check_range(
            "circuitRecoveryWeightPercent",
            self.circuit_recovery_weight_percent,
            RECOVERY_WEIGHT_RANGE,
        )?;
        check_range(
            "circuitRecoveryObservationCount",
            self.circuit_recovery_observation_count,
            RECOVERY_OBSERVATION_RANGE,
        )?;
        check_range(
            "maxWeightAdjustmentPercent",
            self.max_weight_adjustment_percent,
            MAX_ADJUSTMENT_RANGE,
        )?;
        check_range("shortTermWindowMinutes", self.short_term_window_minutes, WINDOW_RANGE)?;
        check_range("mediumTermWindowMinutes", self.medium_term_window_minutes, WINDOW_RANGE)?;
        check_range("longTermWindowMinutes", self.long_term_window_minutes, WINDOW_RANGE)?;

        if self.short_term_window_minutes >= self.medium_term_window_minutes
            || self.medium_term_window_minutes >= self.long_term_window_minutes
        {
            return Err(SchedulerError::configuration(
                "windows",
                "short, medium and long windows must be strictly increasing",
            ));
        }

        Ok(())
    }

    /// Merge a partial update and validate the result.
    ///
    /// `self` is left untouched; the merged settings are returned only
    /// when every field is in range.
    pub fn apply(&self, update: &SettingsUpdate) -> SchedulerResult<ScheduleSettings> {
        let merged = ScheduleSettings {
            enable_realtime_schedule: update
                .enable_realtime_schedule
                .unwrap_or(self.enable_realtime_schedule),
            schedule_interval_seconds: update
                .schedule_interval_seconds
                .unwrap_or(self.schedule_interval_seconds),
            exploration_rate: update.exploration_rate.unwrap_or(self.exploration_rate),
            min_sample_size: update.min_sample_size.unwrap_or(self.min_sample_size),
            circuit_recovery_weight_percent: update
                .circuit_recovery_weight_percent
                .unwrap_or(self.circuit_recovery_weight_percent),
            circuit_recovery_observation_count: update
                .circuit_recovery_observation_count
                .unwrap_or(self.circuit_recovery_observation_count),
            max_weight_adjustment_percent: update
                .max_weight_adjustment_percent
                .unwrap_or(self.max_weight_adjustment_percent),
            short_term_window_minutes: update
                .short_term_window_minutes
                .unwrap_or(self.short_term_window_minutes),
            medium_term_window_minutes: update
                .medium_term_window_minutes
                .unwrap_or(self.medium_term_window_minutes),
            long_term_window_minutes: update
                .long_term_window_minutes
                .unwrap_or(self.long_term_window_minutes),
        };

        merged.validate()?;
        Ok(merged)
    }
}

fn check_range(field: &str, value: u32, range: RangeInclusive<u32>) -> SchedulerResult<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SchedulerError::configuration(
            field,
            format!("{} is outside {}-{}", value, range.start(), range.end()),
        ))
    }
}

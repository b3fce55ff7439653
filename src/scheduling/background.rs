//! Recurring background scheduler.
//!
//! Runs one cycle immediately on `start`, then re-arms a single deferred
//! run after each cycle completes. The delay is re-read from the settings
//! store every time, so interval changes apply on the next tick and cycles
//! never overlap.
//!
//! `stop` bumps a generation counter and signals the pending task. A cycle
//! already in flight finishes, but it will not arm another one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{CycleResult, DecisionEngine};
use super::policy::PolicyKind;
use super::settings::{ScheduleSettings, SettingsUpdate};
use super::types::{EXECUTOR_AUTO, EXECUTOR_REALTIME};
use crate::error::SchedulerResult;

/// Externally visible runtime state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// Whether a recurring loop is active
    pub is_running: bool,
    /// Policy the loop runs
    pub policy: PolicyKind,
    /// When the last background cycle finished
    pub last_execution_time: Option<DateTime<Utc>>,
    /// When the next background cycle is due
    pub next_execution_time: Option<DateTime<Utc>>,
    /// Background cycles run since process start
    pub total_executions: u64,
    /// Error of the last background cycle, cleared on success
    pub last_error: Option<String>,
    /// Interval in effect, seconds
    pub interval_seconds: Option<u32>,
}

/// Process-local runtime state. Never persisted.
#[derive(Debug, Default)]
struct RuntimeState {
    is_running: bool,
    last_execution_time: Option<DateTime<Utc>>,
    next_execution_time: Option<DateTime<Utc>>,
    total_executions: u64,
    last_error: Option<String>,
    interval_seconds: Option<u32>,
    /// Bumped on every start and stop; a loop only re-arms for its own generation
    generation: u64,
}

/// Handle to the pending deferred run.
struct ActiveTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Shared {
    engine: Arc<DecisionEngine>,
    policy: PolicyKind,
    state: RwLock<RuntimeState>,
}

impl Shared {
    /// Run one background cycle and decide the next delay.
    ///
    /// Returns `None` when the loop must not re-arm.
    async fn execute(&self, generation: u64) -> Option<Duration> {
        let result = self
            .engine
            .run_cycle(self.policy, false, EXECUTOR_REALTIME)
            .await;

        let fresh = match self.engine.load_settings().await {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(error = %e, "Could not re-read settings, keeping current interval");
                None
            }
        };

        let now = Utc::now();
        let mut state = self.state.write().await;
        state.last_execution_time = Some(now);
        state.total_executions += 1;
        state.last_error = result.error.clone();

        if state.generation != generation || !state.is_running {
            debug!(generation, "Scheduler stopped during cycle, not re-arming");
            return None;
        }

        let disabled = (result.ok && !result.realtime_enabled)
            || fresh.as_ref().is_some_and(|s| !s.enable_realtime_schedule);
        if disabled {
            state.is_running = false;
            state.next_execution_time = None;
            state.generation += 1;
            info!("Realtime scheduling disabled, background scheduler stopping");
            return None;
        }

        let seconds = fresh
            .map(|s| s.schedule_interval_seconds)
            .or(state.interval_seconds)
            .unwrap_or_else(|| ScheduleSettings::default().schedule_interval_seconds);
        let interval = Duration::from_secs(u64::from(seconds));

        state.interval_seconds = Some(seconds);
        state.next_execution_time =
            Some(now + chrono::Duration::seconds(i64::from(seconds)));

        debug!(
            interval_seconds = seconds,
            total_executions = state.total_executions,
            "Next background cycle armed"
        );
        Some(interval)
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    generation: u64,
    mut delay: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.changed() => {
                debug!(generation, "Pending background cycle cancelled");
                return;
            }
        }

        match shared.execute(generation).await {
            Some(next) => delay = next,
            None => return,
        }
    }
}

/// Owns the recurring scheduling loop.
pub struct BackgroundScheduler {
    shared: Arc<Shared>,
    task: Mutex<Option<ActiveTask>>,
}

impl BackgroundScheduler {
    /// Create a stopped scheduler that runs `policy` on every tick.
    pub fn new(engine: Arc<DecisionEngine>, policy: PolicyKind) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                policy,
                state: RwLock::new(RuntimeState::default()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the recurring loop.
    ///
    /// Returns `Ok(false)` when already running or when realtime scheduling
    /// is disabled. The first cycle runs before this returns.
    pub async fn start(&self) -> SchedulerResult<bool> {
        let mut task = self.task.lock().await;

        if self.shared.state.read().await.is_running {
            debug!("Background scheduler already running");
            return Ok(false);
        }

        let settings = self.shared.engine.load_settings().await?;
        if !settings.enable_realtime_schedule {
            info!("Realtime scheduling disabled, background scheduler not started");
            return Ok(false);
        }

        let generation = {
            let mut state = self.shared.state.write().await;
            state.is_running = true;
            state.interval_seconds = Some(settings.schedule_interval_seconds);
            state.generation += 1;
            state.generation
        };

        info!(
            policy = %self.shared.policy,
            interval_seconds = settings.schedule_interval_seconds,
            "Background scheduler started"
        );

        let Some(delay) = self.shared.execute(generation).await else {
            return Ok(false);
        };

        let (cancel, receiver) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.shared.clone(), generation, delay, receiver));
        *task = Some(ActiveTask { cancel, handle });

        Ok(true)
    }

    /// Stop the loop. A cycle in flight completes but does not re-arm.
    ///
    /// Returns whether the scheduler was running.
    pub async fn stop(&self) -> bool {
        let (was_running, _) = self.halt().await;
        was_running
    }

    /// Stop, wait for the previous loop to exit, then start with fresh settings.
    ///
    /// Waiting keeps a cycle still in flight from overlapping the fresh
    /// first cycle.
    pub async fn restart(&self) -> SchedulerResult<bool> {
        let (_, handle) = self.halt().await;
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Previous background loop ended abnormally");
            }
        }
        self.start().await
    }

    /// Mark stopped and cancel the pending run, handing back the loop task.
    async fn halt(&self) -> (bool, Option<JoinHandle<()>>) {
        let was_running = {
            let mut state = self.shared.state.write().await;
            let was_running = state.is_running;
            state.is_running = false;
            state.next_execution_time = None;
            state.generation += 1;
            was_running
        };

        let active = self.task.lock().await.take();
        let handle = active.map(|active| {
            // Receiver is gone if the loop already exited
            let _ = active.cancel.send(true);
            active.handle
        });

        if was_running {
            info!("Background scheduler stopped");
        }
        (was_running, handle)
    }

    /// Snapshot of the runtime state.
    pub async fn status(&self) -> SchedulerStatus {
        let state = self.shared.state.read().await;
        SchedulerStatus {
            is_running: state.is_running,
            policy: self.shared.policy,
            last_execution_time: state.last_execution_time,
            next_execution_time: state.next_execution_time,
            total_executions: state.total_executions,
            last_error: state.last_error.clone(),
            interval_seconds: state.interval_seconds,
        }
    }

    /// Run one cycle now, outside the timer. May overlap a background cycle.
    pub async fn trigger_now(&self, dry_run: bool) -> CycleResult {
        self.shared
            .engine
            .run_cycle(self.shared.policy, dry_run, EXECUTOR_AUTO)
            .await
    }

    /// Validate and persist a settings change, then bring the loop in line.
    ///
    /// A running loop restarts; a stopped one starts if the change enabled it.
    pub async fn update_settings(
        &self,
        update: &SettingsUpdate,
    ) -> SchedulerResult<ScheduleSettings> {
        let settings = self.shared.engine.update_settings(update).await?;
        let running = self.shared.state.read().await.is_running;

        if running {
            self.restart().await?;
        } else if settings.enable_realtime_schedule {
            self.start().await?;
        }

        Ok(settings)
    }
}

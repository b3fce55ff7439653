//! Adaptive provider scheduling.
//!
//! Periodically re-weights a pool of upstream providers from their recent
//! telemetry, isolating failing ones and probing recovering ones.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  AGGREGATOR  │───▶│    POLICY    │───▶│    ENGINE    │───▶│  AUDIT LOG   │
//! │ windows/days │    │ bandit/rules │    │ commit+clamp │    │ append-only  │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//!        ▲                    ▲
//!        │                    │
//!   telemetry store    circuit breaker
//! ```
//!
//! - [`WindowAggregator`] fuses short/medium/long windows (bandit) or
//!   builds today-versus-yesterday trends (rules)
//! - [`BanditScheduler`] and [`RuleScheduler`] implement [`SchedulingPolicy`]
//! - [`DecisionEngine`] runs a cycle: plan, commit, log
//! - [`BackgroundScheduler`] re-arms one cycle at a time from fresh settings
//!
//! # Safety Features
//!
//! - **Rate limit**: bandit weight changes are capped per cycle
//! - **Circuit breaker**: open circuits isolate a provider, half-open ones
//!   re-enter at a fraction of the baseline
//! - **Baseline**: the first automated change records a rollback reference
//! - **Dry run**: every cycle can be previewed without writes
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use provider_scheduler::scheduling::{
//!     BackgroundScheduler, DecisionEngine, PolicyKind, ProviderCircuitBreaker,
//! };
//! use provider_scheduler::storage::SqliteStorage;
//!
//! let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//! let breaker = Arc::new(ProviderCircuitBreaker::new(config.circuit_breaker.clone()));
//! let engine = Arc::new(DecisionEngine::with_storage(storage, breaker));
//!
//! let preview = engine.preview().await;
//! let scheduler = BackgroundScheduler::new(engine, PolicyKind::Bandit);
//! scheduler.start().await?;
//! ```

pub mod aggregator;
pub mod background;
pub mod bandit;
pub mod circuit_breaker;
pub mod cli;
pub mod engine;
pub mod policy;
pub mod rules;
pub mod scoring;
pub mod settings;
pub mod types;

pub use aggregator::WindowAggregator;
pub use background::{BackgroundScheduler, SchedulerStatus};
pub use bandit::{BanditScheduler, ISOLATED_PRIORITY};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitHealth, CircuitState, ProviderCircuitBreaker,
};
pub use cli::{execute_command, CliResult, SchedulerCommands, SettingsCommands};
pub use engine::{CycleResult, DecisionEngine};
pub use policy::{PolicyKind, PoolContext, ProviderSnapshot, SchedulingPolicy, Suggestion};
pub use rules::RuleScheduler;
pub use scoring::{PerformanceScorer, Trend};
pub use settings::{ScheduleSettings, SettingsUpdate};
pub use types::{
    AfterState, Baseline, BeforeState, DailyTrend, DecisionMetrics, FusedMetrics,
    MultiWindowMetrics, ScheduleAction, ScheduleDecision, ScheduleLog, ScheduleSummary,
    WindowMetrics, EXECUTOR_AUTO, EXECUTOR_REALTIME,
};

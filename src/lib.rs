//! # Provider Scheduler
//!
//! Adaptive traffic scheduling for a pool of upstream API providers. Each
//! cycle turns recent call telemetry into new routing weights and
//! priorities, isolates providers whose circuit is open, and records every
//! decision in an append-only audit log.
//!
//! ## Features
//!
//! - **Bandit policy**: UCB1 with epsilon-greedy exploration over fused
//!   multi-window metrics, rate-limited per cycle
//! - **Rule policy**: coarse thresholds over today's metrics, used for previews
//! - **Circuit breakers**: per-provider closed/open/half-open state machines
//! - **Baselines**: first automated change records a rollback reference
//! - **Recurring scheduler**: self-re-arming background loop with live interval
//!
//! ## Architecture
//!
//! ```text
//! Telemetry (SQLite) → WindowAggregator → Policy → DecisionEngine → Providers (SQLite)
//!                                                        ↓
//!                                                  Schedule Logs
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use provider_scheduler::{Config, DecisionEngine, PolicyKind, ProviderCircuitBreaker};
//! use provider_scheduler::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let breaker = Arc::new(ProviderCircuitBreaker::new(config.circuit_breaker.clone()));
//!     let engine = DecisionEngine::with_storage(storage, breaker);
//!     let result = engine.run_cycle(PolicyKind::Bandit, true, "auto").await;
//!     println!("{} providers affected", result.affected_providers);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management for the scheduler process.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Scoring, circuit breaking, policies and the scheduling loop.
pub mod scheduling;
/// Provider, telemetry, audit log and settings storage.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult, SchedulerError, StorageError};
pub use scheduling::{
    BackgroundScheduler, CycleResult, DecisionEngine, PolicyKind, ProviderCircuitBreaker,
    ScheduleSettings,
};

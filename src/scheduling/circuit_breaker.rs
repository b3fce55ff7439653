//! Per-provider circuit breakers.
//!
//! Every provider gets its own closed/open/half-open state machine. The
//! scheduling cycle only reads health snapshots; state changes come from
//! the call-result reporting path (`record_success` / `record_failure`)
//! and from a manual `reset`.
//!
//! # States
//!
//! - **Closed**: Normal operation, failures are counted
//! - **Open**: Provider is isolated until `open_until`
//! - **Half-Open**: Reported once `open_until` has passed; a run of
//!   successes closes the circuit, any failure re-opens it

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// State of a provider circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation
    #[default]
    #[serde(rename = "closed")]
    Closed,
    /// Isolated after too many failures
    #[serde(rename = "open")]
    Open,
    /// Probing recovery
    #[serde(rename = "half-open")]
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half-open" | "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Configuration for provider circuit breakers.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before a closed circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit stays open (milliseconds)
    pub open_duration_ms: u64,
    /// Consecutive half-open successes needed to close
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 1_800_000, // 30 minutes
            half_open_success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: std::env::var("CB_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.failure_threshold),
            open_duration_ms: std::env::var("CB_OPEN_DURATION_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.open_duration_ms),
            half_open_success_threshold: std::env::var("CB_HALF_OPEN_SUCCESS_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.half_open_success_threshold),
        }
    }

    /// Get the open duration as a chrono Duration.
    pub fn open_duration(&self) -> Duration {
        Duration::milliseconds(self.open_duration_ms.min(i64::MAX as u64) as i64)
    }
}

/// Health snapshot of one provider circuit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitHealth {
    /// Effective state at the time of the query
    pub circuit_state: CircuitState,
    /// Consecutive failures counted
    pub failure_count: u32,
    /// Time of the most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// End of the open period, if the circuit tripped
    pub open_until: Option<DateTime<Utc>>,
}

impl Default for CircuitHealth {
    fn default() -> Self {
        Self {
            circuit_state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            open_until: None,
        }
    }
}

/// State machine for a single provider.
#[derive(Debug, Clone)]
struct ProviderCircuit {
    /// Stored state; `Open` reads as half-open once `open_until` passes
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure_time: Option<DateTime<Utc>>,
    open_until: Option<DateTime<Utc>>,
    /// Per-provider override of the failure threshold
    failure_threshold: Option<u32>,
}

impl ProviderCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            last_failure_time: None,
            open_until: None,
            failure_threshold: None,
        }
    }

    fn effective_state(&self, now: DateTime<Utc>) -> CircuitState {
        match (self.state, self.open_until) {
            (CircuitState::Open, Some(until)) if now >= until => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }

    fn health(&self, now: DateTime<Utc>) -> CircuitHealth {
        CircuitHealth {
            circuit_state: self.effective_state(now),
            failure_count: self.failure_count,
            last_failure_time: self.last_failure_time,
            open_until: self.open_until,
        }
    }

    fn trip(
        &mut self,
        provider_id: &str,
        threshold: u32,
        config: &CircuitBreakerConfig,
        now: DateTime<Utc>,
    ) {
        let from = self.effective_state(now);
        self.state = CircuitState::Open;
        self.failure_count = threshold;
        self.half_open_successes = 0;
        self.open_until = Some(now + config.open_duration());
        info!(
            provider_id = provider_id,
            from = %from,
            to = %CircuitState::Open,
            open_until = ?self.open_until,
            "Circuit breaker state transition"
        );
    }

    fn record_failure(
        &mut self,
        provider_id: &str,
        config: &CircuitBreakerConfig,
        now: DateTime<Utc>,
    ) {
        let threshold = self.failure_threshold.unwrap_or(config.failure_threshold).max(1);
        self.last_failure_time = Some(now);

        match self.effective_state(now) {
            CircuitState::Closed => {
                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count >= threshold {
                    self.trip(provider_id, threshold, config, now);
                }
            }
            CircuitState::HalfOpen => {
                // Failed while probing - re-open as a fresh trip
                self.trip(provider_id, threshold, config, now);
            }
            CircuitState::Open => {
                self.failure_count = self.failure_count.saturating_add(1);
            }
        }
    }

    fn record_success(
        &mut self,
        provider_id: &str,
        config: &CircuitBreakerConfig,
        now: DateTime<Utc>,
    ) {
        match self.effective_state(now) {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::HalfOpen;
                self.half_open_successes += 1;
                if self.half_open_successes >= config.half_open_success_threshold.max(1) {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.half_open_successes = 0;
                    self.open_until = None;
                    info!(
                        provider_id = provider_id,
                        from = %CircuitState::HalfOpen,
                        to = %CircuitState::Closed,
                        "Circuit breaker state transition"
                    );
                }
            }
            CircuitState::Open => {
                warn!(
                    provider_id = provider_id,
                    "Success recorded while circuit is open - ignored until open period ends"
                );
            }
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_successes = 0;
        self.open_until = None;
    }
}

/// Circuit breakers for every provider in the pool.
///
/// Records are created lazily on the first query or report and are never
/// removed; `reset` returns a circuit to closed.
#[derive(Debug)]
pub struct ProviderCircuitBreaker {
    config: RwLock<CircuitBreakerConfig>,
    circuits: RwLock<HashMap<String, ProviderCircuit>>,
}

impl ProviderCircuitBreaker {
    /// Create a breaker registry with the given defaults.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Current default configuration.
    pub async fn config(&self) -> CircuitBreakerConfig {
        self.config.read().await.clone()
    }

    /// Change how many half-open successes close a circuit.
    pub async fn set_half_open_success_threshold(&self, threshold: u32) {
        let mut config = self.config.write().await;
        config.half_open_success_threshold = threshold.max(1);
    }

    /// Override the failure threshold for one provider.
    pub async fn set_failure_threshold(&self, provider_id: &str, threshold: u32) {
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(provider_id.to_string())
            .or_insert_with(ProviderCircuit::new)
            .failure_threshold = Some(threshold.max(1));
    }

    /// Health snapshot for a provider at the current time.
    pub async fn health(&self, provider_id: &str) -> CircuitHealth {
        self.health_at(provider_id, Utc::now()).await
    }

    /// Health snapshot for a provider at `now`.
    pub async fn health_at(&self, provider_id: &str, now: DateTime<Utc>) -> CircuitHealth {
        {
            let circuits = self.circuits.read().await;
            if let Some(circuit) = circuits.get(provider_id) {
                return circuit.health(now);
            }
        }

        let mut circuits = self.circuits.write().await;
        circuits
            .entry(provider_id.to_string())
            .or_insert_with(ProviderCircuit::new)
            .health(now)
    }

    /// Health of every provider seen so far, ordered by provider id.
    pub async fn all_health(&self) -> Vec<(String, CircuitHealth)> {
        let now = Utc::now();
        let circuits = self.circuits.read().await;
        let mut all: Vec<_> = circuits
            .iter()
            .map(|(id, circuit)| (id.clone(), circuit.health(now)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Record a successful call.
    pub async fn record_success(&self, provider_id: &str) {
        self.record_success_at(provider_id, Utc::now()).await;
    }

    /// Record a successful call observed at `now`.
    pub async fn record_success_at(&self, provider_id: &str, now: DateTime<Utc>) {
        let config = self.config().await;
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(provider_id.to_string())
            .or_insert_with(ProviderCircuit::new)
            .record_success(provider_id, &config, now);
    }

    /// Record a failed call.
    pub async fn record_failure(&self, provider_id: &str) {
        self.record_failure_at(provider_id, Utc::now()).await;
    }

    /// Record a failed call observed at `now`.
    pub async fn record_failure_at(&self, provider_id: &str, now: DateTime<Utc>) {
        let config = self.config().await;
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(provider_id.to_string())
            .or_insert_with(ProviderCircuit::new)
            .record_failure(provider_id, &config, now);
    }

    /// Manually force a circuit closed with counters zeroed.
    pub async fn reset(&self, provider_id: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(provider_id.to_string())
            .or_insert_with(ProviderCircuit::new);
        info!(
            provider_id = provider_id,
            from = %circuit.state,
            "Circuit breaker manually reset to closed"
        );
        circuit.reset();
    }
}

impl Default for ProviderCircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            open_duration_ms: 60_000,
            half_open_success_threshold: 2,
        }
    }

    async fn tripped(breaker: &ProviderCircuitBreaker, id: &str, now: DateTime<Utc>) {
        for _ in 0..3 {
            breaker.record_failure_at(id, now).await;
        }
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        let health = breaker.health("p1").await;
        assert_eq!(health.circuit_state, CircuitState::Closed);
        assert_eq!(health.failure_count, 0);
        assert!(health.open_until.is_none());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        let now = Utc::now();

        breaker.record_failure_at("p1", now).await;
        breaker.record_failure_at("p1", now).await;
        assert_eq!(breaker.health_at("p1", now).await.circuit_state, CircuitState::Closed);

        breaker.record_failure_at("p1", now).await;
        let health = breaker.health_at("p1", now).await;
        assert_eq!(health.circuit_state, CircuitState::Open);
        assert_eq!(health.open_until, Some(now + Duration::milliseconds(60_000)));
        assert_eq!(health.last_failure_time, Some(now));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        breaker.record_failure("p1").await;
        breaker.record_failure("p1").await;
        assert_eq!(breaker.health("p1").await.failure_count, 2);

        breaker.record_success("p1").await;
        let health = breaker.health("p1").await;
        assert_eq!(health.failure_count, 0);
        assert_eq!(health.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reports_half_open_after_open_period() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        let now = Utc::now();
        tripped(&breaker, "p1", now).await;

        let just_before = now + Duration::milliseconds(59_999);
        assert_eq!(breaker.health_at("p1", just_before).await.circuit_state, CircuitState::Open);

        let at_expiry = now + Duration::milliseconds(60_000);
        assert_eq!(breaker.health_at("p1", at_expiry).await.circuit_state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_successes() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        let now = Utc::now();
        tripped(&breaker, "p1", now).await;

        let later = now + Duration::minutes(2);
        breaker.record_success_at("p1", later).await;
        assert_eq!(breaker.health_at("p1", later).await.circuit_state, CircuitState::HalfOpen);

        breaker.record_success_at("p1", later).await;
        let health = breaker.health_at("p1", later).await;
        assert_eq!(health.circuit_state, CircuitState::Closed);
        assert_eq!(health.failure_count, 0);
        assert!(health.open_until.is_none());
    }

    #[tokio::test]
    async fn test_half_open_reopens_on_failure() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        let now = Utc::now();
        tripped(&breaker, "p1", now).await;

        let later = now + Duration::minutes(2);
        breaker.record_success_at("p1", later).await;
        breaker.record_failure_at("p1", later).await;

        let health = breaker.health_at("p1", later).await;
        assert_eq!(health.circuit_state, CircuitState::Open);
        assert_eq!(health.failure_count, 3);
        assert_eq!(health.open_until, Some(later + Duration::milliseconds(60_000)));
    }

    #[tokio::test]
    async fn test_success_while_open_is_ignored() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        let now = Utc::now();
        tripped(&breaker, "p1", now).await;

        breaker.record_success_at("p1", now).await;
        assert_eq!(breaker.health_at("p1", now).await.circuit_state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_per_provider_threshold() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        breaker.set_failure_threshold("fragile", 1).await;

        breaker.record_failure("fragile").await;
        breaker.record_failure("sturdy").await;

        assert_eq!(breaker.health("fragile").await.circuit_state, CircuitState::Open);
        assert_eq!(breaker.health("sturdy").await.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_threshold_is_adjustable() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        breaker.set_half_open_success_threshold(1).await;
        let now = Utc::now();
        tripped(&breaker, "p1", now).await;

        let later = now + Duration::minutes(5);
        breaker.record_success_at("p1", later).await;
        assert_eq!(breaker.health_at("p1", later).await.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = ProviderCircuitBreaker::new(test_config());
        tripped(&breaker, "p1", Utc::now()).await;
        assert_eq!(breaker.health("p1").await.circuit_state, CircuitState::Open);

        breaker.reset("p1").await;
        let health = breaker.health("p1").await;
        assert_eq!(health.circuit_state, CircuitState::Closed);
        assert_eq!(health.failure_count, 0);
        assert!(health.open_until.is_none());
    }

    #[tokio::test]
    async fn test_all_health_is_sorted() {
        let breaker = ProviderCircuitBreaker::default();
        breaker.health("b").await;
        breaker.health("a").await;
        let ids: Vec<_> = breaker.all_health().await.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_circuit_state_string_conversion() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.as_str(), "open");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half-open");

        assert_eq!("closed".parse::<CircuitState>().unwrap(), CircuitState::Closed);
        assert_eq!("half_open".parse::<CircuitState>().unwrap(), CircuitState::HalfOpen);
        assert_eq!("HALF-OPEN".parse::<CircuitState>().unwrap(), CircuitState::HalfOpen);
        assert!("ajar".parse::<CircuitState>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.open_duration_ms, 1_800_000);
        assert_eq!(config.half_open_success_threshold, 2);
    }
}

//! Config environment variable tests
//!
//! These tests verify that Config::from_env() reads and applies environment
//! variable overrides. Config::from_env() also loads a .env file via dotenvy
//! when one exists, so the tests only assert on variables they set.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use provider_scheduler::config::{Config, LogFormat};
use provider_scheduler::{AppError, PolicyKind};
use serial_test::serial;
use std::env;

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    env::remove_var("SCHEDULER_POLICY");

    let result = Config::from_env();
    assert!(result.is_ok(), "Config::from_env() needs no required variables");
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    env::set_var("DATABASE_PATH", "/custom/scheduler.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/scheduler.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_invalid_max_connections_falls_back() {
    env::set_var("DATABASE_MAX_CONNECTIONS", "lots");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    env::set_var("LOG_FORMAT", "JSON");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    env::set_var("LOG_FORMAT", "anything-else");
    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Pretty);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_log_level() {
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_LEVEL");
}

#[test]
#[serial]
fn test_config_from_env_policy() {
    env::set_var("SCHEDULER_POLICY", "rules");
    let config = Config::from_env().unwrap();
    assert_eq!(config.policy, PolicyKind::Rule);

    env::set_var("SCHEDULER_POLICY", "mab");
    let config = Config::from_env().unwrap();
    assert_eq!(config.policy, PolicyKind::Bandit);

    env::remove_var("SCHEDULER_POLICY");
    let config = Config::from_env().unwrap();
    assert_eq!(config.policy, PolicyKind::Bandit);
}

#[test]
#[serial]
fn test_config_from_env_unknown_policy_is_config_error() {
    env::set_var("SCHEDULER_POLICY", "round-robin");

    let result = Config::from_env();
    assert!(matches!(result, Err(AppError::Config { .. })));

    env::remove_var("SCHEDULER_POLICY");
}

#[test]
#[serial]
fn test_config_from_env_circuit_breaker() {
    env::set_var("CB_FAILURE_THRESHOLD", "3");
    env::set_var("CB_OPEN_DURATION_MS", "60000");
    env::set_var("CB_HALF_OPEN_SUCCESS_THRESHOLD", "4");

    let config = Config::from_env().unwrap();
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.circuit_breaker.open_duration_ms, 60_000);
    assert_eq!(config.circuit_breaker.half_open_success_threshold, 4);

    env::remove_var("CB_FAILURE_THRESHOLD");
    env::remove_var("CB_OPEN_DURATION_MS");
    env::remove_var("CB_HALF_OPEN_SUCCESS_THRESHOLD");
}

#[test]
#[serial]
fn test_config_from_env_zero_thresholds_keep_defaults() {
    env::set_var("CB_FAILURE_THRESHOLD", "0");
    env::set_var("CB_HALF_OPEN_SUCCESS_THRESHOLD", "0");

    let config = Config::from_env().unwrap();
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.circuit_breaker.half_open_success_threshold, 2);

    env::remove_var("CB_FAILURE_THRESHOLD");
    env::remove_var("CB_HALF_OPEN_SUCCESS_THRESHOLD");
}

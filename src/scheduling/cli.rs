//! CLI commands for the provider scheduler.
//!
//! One-shot operational commands: run or preview a cycle, browse the audit
//! log, inspect and change settings, and reset baselines. The long-running
//! `serve` command lives in the binary since it owns signal handling.

use clap::Subcommand;

use super::engine::{CycleResult, DecisionEngine};
use super::policy::PolicyKind;
use super::settings::{ScheduleSettings, SettingsUpdate};
use super::types::{ScheduleDecision, ScheduleLog};

const RULE: &str =
    "═══════════════════════════════════════════════════════════════════════════════\n\n";

/// Scheduler CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SchedulerCommands {
    /// Run one scheduling cycle now
    Cycle {
        /// Policy to run: bandit or rule
        #[arg(long, default_value = "bandit")]
        policy: PolicyKind,

        /// Compute and log decisions without changing providers
        #[arg(long)]
        dry_run: bool,

        /// Name recorded as the executor in the audit log
        #[arg(long, default_value = "auto")]
        executor: String,
    },

    /// Dry-run the rule policy and show what it would change
    Preview,

    /// List recent schedule logs
    Logs {
        /// Maximum number of logs to show
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Number of logs to skip
        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Show one schedule log with every decision
    Log {
        /// Log identifier
        id: String,
    },

    /// Show or change scheduling settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },

    /// Clear recorded baselines so the next change seeds new ones
    ResetBaseline {
        /// Provider to reset
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        provider: Option<String>,

        /// Reset every provider
        #[arg(long)]
        all: bool,
    },
}

/// Settings subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommands {
    /// Show current settings
    Show,

    /// Change one or more settings
    Set {
        /// Enable or disable the background scheduler
        #[arg(long)]
        enabled: Option<bool>,

        /// Seconds between background cycles (30-300)
        #[arg(long)]
        interval: Option<u32>,

        /// Bandit exploration rate, percent (0-100)
        #[arg(long)]
        exploration_rate: Option<u32>,

        /// Calls needed before a score is trusted
        #[arg(long)]
        min_sample_size: Option<u32>,

        /// Half-open weight, percent of baseline (1-100)
        #[arg(long)]
        recovery_weight_percent: Option<u32>,

        /// Half-open successes needed to close a circuit
        #[arg(long)]
        recovery_observations: Option<u32>,

        /// Largest weight change per cycle, percent (1-50)
        #[arg(long)]
        max_adjustment_percent: Option<u32>,

        /// Short window, minutes
        #[arg(long)]
        short_window: Option<u32>,

        /// Medium window, minutes
        #[arg(long)]
        medium_window: Option<u32>,

        /// Long window, minutes
        #[arg(long)]
        long_window: Option<u32>,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a scheduler CLI command.
pub async fn execute_command(command: SchedulerCommands, engine: &DecisionEngine) -> CliResult {
    match command {
        SchedulerCommands::Cycle {
            policy,
            dry_run,
            executor,
        } => execute_cycle(engine, policy, dry_run, &executor).await,
        SchedulerCommands::Preview => {
            render_cycle("Schedule Preview (rule policy)", engine.preview().await)
        }
        SchedulerCommands::Logs { limit, offset } => execute_logs(engine, limit, offset).await,
        SchedulerCommands::Log { id } => execute_log(engine, &id).await,
        SchedulerCommands::Settings { action } => execute_settings(engine, action).await,
        SchedulerCommands::ResetBaseline { provider, all } => {
            execute_reset_baseline(engine, if all { None } else { provider }).await
        }
    }
}

async fn execute_cycle(
    engine: &DecisionEngine,
    policy: PolicyKind,
    dry_run: bool,
    executor: &str,
) -> CliResult {
    let title = format!(
        "Scheduling Cycle ({} policy{})",
        policy,
        if dry_run { ", dry run" } else { "" }
    );
    render_cycle(&title, engine.run_cycle(policy, dry_run, executor).await)
}

fn render_cycle(title: &str, result: CycleResult) -> CliResult {
    if !result.ok {
        return CliResult::error(format!(
            "Cycle failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }

    let mut output = String::new();
    output.push_str(&format!("\n{}\n", title));
    output.push_str(RULE);

    output.push_str(&format!(
        "Providers: {} total, {} affected\n",
        result.total_providers, result.affected_providers
    ));
    output.push_str(&format!(
        "Summary: {} promoted, {} demoted, {} recovered, {} maintained, \
         {} circuit open, {} explored\n",
        result.summary.promoted,
        result.summary.demoted,
        result.summary.recovered,
        result.summary.maintained,
        result.summary.circuit_open,
        result.summary.explored
    ));
    if result.persistence_failures > 0 {
        output.push_str(&format!(
            "Warning: {} provider(s) could not be updated\n",
            result.persistence_failures
        ));
    }
    match &result.log_id {
        Some(id) => output.push_str(&format!("Log: {}\n", id)),
        None => output.push_str("Log: not written\n"),
    }
    output.push('\n');

    for decision in &result.decisions {
        output.push_str(&format_decision(decision));
    }

    CliResult::success(output)
}

async fn execute_logs(engine: &DecisionEngine, limit: u32, offset: u32) -> CliResult {
    let total = match engine.count_logs().await {
        Ok(total) => total,
        Err(e) => return CliResult::error(format!("Failed to count schedule logs: {}", e)),
    };
    let logs = match engine.list_logs(limit, offset).await {
        Ok(logs) => logs,
        Err(e) => return CliResult::error(format!("Failed to load schedule logs: {}", e)),
    };

    let mut output = String::new();
    output.push_str("\nSchedule Logs\n");
    output.push_str(RULE);

    if logs.is_empty() {
        output.push_str("No schedule logs recorded yet.\n");
    } else {
        output.push_str(&format!("Showing {} of {} log(s):\n\n", logs.len(), total));
        for log in &logs {
            output.push_str(&format_log_line(log));
        }
    }

    CliResult::success(output)
}

async fn execute_log(engine: &DecisionEngine, id: &str) -> CliResult {
    let log = match engine.get_log(id).await {
        Ok(log) => log,
        Err(e) => return CliResult::error(format!("Failed to load schedule log: {}", e)),
    };

    let mut output = String::new();
    output.push_str(&format!("\nSchedule Log {}\n", log.id));
    output.push_str(RULE);
    output.push_str(&format_log_line(&log));
    output.push('\n');
    for decision in &log.decisions {
        output.push_str(&format_decision(decision));
    }

    CliResult::success(output)
}

async fn execute_settings(engine: &DecisionEngine, action: SettingsCommands) -> CliResult {
    match action {
        SettingsCommands::Show => match engine.load_settings().await {
            Ok(settings) => CliResult::success(format_settings("Scheduling Settings", &settings)),
            Err(e) => CliResult::error(format!("Failed to load settings: {}", e)),
        },
        SettingsCommands::Set {
            enabled,
            interval,
            exploration_rate,
            min_sample_size,
            recovery_weight_percent,
            recovery_observations,
            max_adjustment_percent,
            short_window,
            medium_window,
            long_window,
        } => {
            let update = SettingsUpdate {
                enable_realtime_schedule: enabled,
                schedule_interval_seconds: interval,
                exploration_rate,
                min_sample_size,
                circuit_recovery_weight_percent: recovery_weight_percent,
                circuit_recovery_observation_count: recovery_observations,
                max_weight_adjustment_percent: max_adjustment_percent,
                short_term_window_minutes: short_window,
                medium_term_window_minutes: medium_window,
                long_term_window_minutes: long_window,
            };
            if update.is_empty() {
                return CliResult::error("No settings given; see `settings set --help`");
            }

            match engine.update_settings(&update).await {
                Ok(settings) => CliResult::success(format_settings("Settings Updated", &settings)),
                Err(e) => CliResult::error(format!("Settings rejected: {}", e)),
            }
        }
    }
}

async fn execute_reset_baseline(engine: &DecisionEngine, provider_id: Option<String>) -> CliResult {
    let target = provider_id.clone().unwrap_or_else(|| "all providers".to_string());
    match engine.reset_provider_baseline(provider_id).await {
        Ok(cleared) => CliResult::success(format!(
            "Baseline reset for {} ({} record(s) cleared)\n",
            target, cleared
        )),
        Err(e) => CliResult::error(format!("Failed to reset baseline: {}", e)),
    }
}

// Helper functions

fn format_log_line(log: &ScheduleLog) -> String {
    format!(
        "{} | {} | {} | {}{} | {} total, {} affected\n",
        log.executed_at.format("%Y-%m-%d %H:%M:%S"),
        log.id,
        log.executor,
        log.policy,
        if log.dry_run { " (dry run)" } else { "" },
        log.total_providers,
        log.affected_providers
    )
}

fn format_decision(decision: &ScheduleDecision) -> String {
    format!(
        "  [{}] {} ({}): weight {} → {}, priority {} → {}, score {:.1}, \
         confidence {}%\n      {}\n",
        decision.action.as_str().to_uppercase(),
        decision.provider_name,
        decision.before_state.circuit_state,
        decision.before_state.weight,
        decision.after_state.weight,
        decision.before_state.priority,
        decision.after_state.priority,
        decision.before_state.score,
        decision.confidence,
        decision.reason
    )
}

fn format_settings(title: &str, settings: &ScheduleSettings) -> String {
    let mut output = String::new();
    output.push_str(&format!("\n{}\n", title));
    output.push_str(RULE);

    output.push_str(&format!(
        "Realtime Scheduling: {}\n",
        if settings.enable_realtime_schedule { "ENABLED" } else { "DISABLED" }
    ));
    output.push_str(&format!("  Interval: {}s\n", settings.schedule_interval_seconds));
    output.push_str(&format!("  Exploration Rate: {}%\n", settings.exploration_rate));
    output.push_str(&format!("  Min Sample Size: {}\n", settings.min_sample_size));
    output.push_str(&format!(
        "  Max Weight Adjustment: {}%\n",
        settings.max_weight_adjustment_percent
    ));
    output.push('\n');

    output.push_str("Circuit Recovery:\n");
    output.push_str(&format!(
        "  Half-Open Weight: {}% of baseline\n",
        settings.circuit_recovery_weight_percent
    ));
    output.push_str(&format!(
        "  Successes To Close: {}\n",
        settings.circuit_recovery_observation_count
    ));
    output.push('\n');

    output.push_str("Windows:\n");
    output.push_str(&format!("  Short: {}m\n", settings.short_term_window_minutes));
    output.push_str(&format!("  Medium: {}m\n", settings.medium_term_window_minutes));
    output.push_str(&format!("  Long: {}m\n", settings.long_term_window_minutes));

    output
}

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use provider_scheduler::{
    config::Config,
    scheduling::{
        execute_command, BackgroundScheduler, DecisionEngine, PolicyKind, ProviderCircuitBreaker,
        SchedulerCommands,
    },
    storage::SqliteStorage,
};

/// Adaptive provider scheduler
#[derive(Parser, Debug)]
#[command(name = "provider-scheduler", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the recurring scheduler until SIGINT or SIGTERM
    Serve,

    #[command(flatten)]
    Admin(SchedulerCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        policy = %config.policy,
        "Provider scheduler starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let breaker = Arc::new(ProviderCircuitBreaker::new(config.circuit_breaker.clone()));
    let engine = Arc::new(DecisionEngine::with_storage(Arc::new(storage), breaker));

    match cli.command {
        Commands::Serve => serve(engine, config.policy).await,
        Commands::Admin(command) => {
            let result = execute_command(command, &engine).await;
            if result.exit_code == 0 {
                println!("{}", result.message);
            } else {
                eprintln!("{}", result.message);
            }
            std::process::exit(result.exit_code);
        }
    }
}

/// Run the background scheduler until a termination signal arrives.
async fn serve(engine: Arc<DecisionEngine>, policy: PolicyKind) -> anyhow::Result<()> {
    let scheduler = BackgroundScheduler::new(engine, policy);

    match scheduler.start().await {
        Ok(true) => info!("Background scheduler running, waiting for shutdown signal..."),
        Ok(false) => warn!(
            "Realtime scheduling is disabled; \
             enable it with `settings set --enabled true` and restart"
        ),
        Err(e) => {
            error!(error = %e, "Failed to start background scheduler");
            return Err(e.into());
        }
    }

    shutdown_signal().await;

    scheduler.stop().await;
    let status = scheduler.status().await;
    info!(
        total_executions = status.total_executions,
        "Scheduler shutdown complete"
    );
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        provider_scheduler::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        provider_scheduler::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

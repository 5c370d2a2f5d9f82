use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use consumption_ledger::{
    AppState, build_app, cache,
    cache::Cache,
    clock::{Clock, SystemClock},
    config::LedgerConfig,
    db::DbPool,
    ingest::{RequestSweeper, StreamKind, StreamWorker, UsageMatcher},
    jobs::{JobKind, JobRunner, spawn_scheduled_jobs},
    notifications, observability, payments,
    services::Services,
    streams,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

const DEFAULT_CONFIG_PATH: &str = "ledger.toml";

#[derive(Parser)]
#[command(name = "consumption-ledger")]
#[command(about = "Usage metering and wallet billing for LLM gateways", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Consume usage streams, run scheduled jobs and serve the webhook endpoint (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Run one job once and exit
    Run {
        #[arg(value_enum)]
        job: JobKind,

        /// Fire time the job derives its period from (RFC 3339). Defaults to now.
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        None | Some(Command::Serve) => run_server(config_path).await,
        Some(Command::Migrate) => run_migrate(config_path).await,
        Some(Command::Run { job, as_of }) => run_job(config_path, job, as_of).await,
    }
}

fn load_config(explicit_config_path: Option<&str>) -> (PathBuf, LedgerConfig) {
    let config_path = PathBuf::from(explicit_config_path.unwrap_or(DEFAULT_CONFIG_PATH));
    match LedgerConfig::from_file(&config_path) {
        Ok(config) => (config_path, config),
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &LedgerConfig) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }
}

/// Everything the server and one-shot jobs share.
struct Ledger {
    config: Arc<LedgerConfig>,
    db: Arc<DbPool>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    services: Services,
}

/// Connect storage and build the services. Exits the process on failure.
async fn bootstrap(config: LedgerConfig) -> Ledger {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. The ledger requires [database].");
        std::process::exit(1);
    }
    let db = match DbPool::from_config(&config.database).await {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    if config.database.run_migrations()
        && let Err(e) = db.run_migrations().await
    {
        tracing::error!(error = %e, "Database migrations failed");
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }

    let cache = match cache::from_config(&config.cache, clock.clone()).await {
        Ok(cache) => cache,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize cache");
            eprintln!("Error: Failed to initialize cache: {}", e);
            std::process::exit(1);
        }
    };

    let http = match reqwest::Client::builder().build() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let notifier = notifications::from_config(&config.notifications, http.clone());
    let gateway = payments::from_config(&config.payments, http);
    if gateway.is_none() {
        tracing::info!("No payment provider configured, auto-top-up charges are disabled");
    }

    let services = Services::new(
        &config,
        db.clone(),
        cache.clone(),
        clock.clone(),
        notifier,
        gateway,
    );

    Ledger {
        config: Arc::new(config),
        db,
        cache,
        clock,
        services,
    }
}

fn request_sweeper(ledger: &Ledger) -> Option<Arc<RequestSweeper>> {
    let sweep = &ledger.config.ingest.sweep;
    sweep.enabled.then(|| {
        Arc::new(RequestSweeper::new(
            ledger.db.clone(),
            ledger.services.reconciliation.clone(),
            sweep.batch_size,
        ))
    })
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config_path, config) = load_config(explicit_config_path);
    init_tracing(&config);

    if config.observability.metrics.enabled
        && let Err(e) = observability::metrics::init_metrics(&config.observability.metrics)
    {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    tracing::info!(
        config_file = %config_path.display(),
        "Starting consumption ledger"
    );

    let ledger = bootstrap(config).await;
    let config = ledger.config.clone();
    let task_tracker = TaskTracker::new();
    let cancel = CancellationToken::new();

    match streams::from_config(&config.ingest).await {
        Ok(Some(usage_streams)) => {
            let matcher = Arc::new(UsageMatcher::new(
                ledger.cache.clone(),
                ledger.db.clone(),
                ledger.services.reconciliation.clone(),
                ledger.clock.clone(),
                &config.ingest,
            ));
            for (kind, stream) in [
                (StreamKind::Requests, usage_streams.requests),
                (StreamKind::Responses, usage_streams.responses),
            ] {
                let worker = StreamWorker::new(kind, stream, matcher.clone(), &config.ingest);
                let cancel = cancel.clone();
                task_tracker.spawn(async move { worker.run(cancel).await });
            }
        }
        Ok(None) => {
            tracing::warn!("No usage streams configured, ingestion is disabled");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to connect usage streams, ingestion is disabled");
        }
    }

    let runner = Arc::new(JobRunner::new(
        ledger.services.clone(),
        request_sweeper(&ledger),
    ));
    spawn_scheduled_jobs(
        runner,
        &config.jobs,
        ledger.clock.clone(),
        &task_tracker,
        cancel.clone(),
    );

    let state = AppState::new(
        config.clone(),
        ledger.db.clone(),
        ledger.cache.clone(),
        &ledger.services,
        ledger.clock.clone(),
    );
    let app = build_app(&config, state);

    let addr = config.server.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind");
            eprintln!("Error: Failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Listening");

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker, cancel, shutdown_timeout))
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal(
    task_tracker: TaskTracker,
    cancel: CancellationToken,
    timeout: Duration,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping workers and jobs...");

    // Workers leave their in-flight message unacknowledged for redelivery
    cancel.cancel();
    task_tracker.close();

    match tokio::time::timeout(timeout, task_tracker.wait()).await {
        Ok(()) => tracing::info!("All background tasks completed"),
        Err(_) => {
            tracing::warn!("Timeout waiting for background tasks, some may not have completed")
        }
    }

    tracing::info!("Shutdown complete");
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let (config_path, config) = load_config(explicit_config_path);
    init_tracing(&config);

    tracing::info!(
        config_file = %config_path.display(),
        "Running database migrations"
    );

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Nothing to migrate.");
        std::process::exit(1);
    }

    match DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => {
                tracing::info!("Database migrations completed successfully");
                std::process::exit(0);
            }
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                eprintln!("Error: Database migrations failed: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_job(explicit_config_path: Option<&str>, job: JobKind, as_of: Option<DateTime<Utc>>) {
    let (_, config) = load_config(explicit_config_path);
    init_tracing(&config);

    let ledger = bootstrap(config).await;
    let fire_at = as_of.unwrap_or_else(|| ledger.clock.now());
    let runner = JobRunner::new(ledger.services.clone(), request_sweeper(&ledger));

    match runner.run(job, fire_at).await {
        Ok(()) => {
            tracing::info!(job = job.name(), fire_at = %fire_at, "Job completed");
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!(job = job.name(), error = %e, "Job failed");
            eprintln!("Error: {} job failed: {}", job.name(), e);
            std::process::exit(1);
        }
    }
}

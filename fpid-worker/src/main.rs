//! fpid-worker - background task worker
//!
//! Pulls tasks from the shared `task_queue` table and runs them against the
//! identity store. Run several instances against the same database to
//! share the load; each task goes to exactly one of them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fpid_common::config::TomlConfig;
use fpid_common::db::init_database;
use fpid_common::tasks::{SqliteTaskQueue, TaskArgs, TaskQueue, TaskRecord};
use fpid_common::BitErrorComparator;
use fpid_worker::logging::Logging;
use fpid_worker::{default_registry, Worker, WorkerContext, WorkerSettings};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command-line arguments for fpid-worker
#[derive(Parser, Debug)]
#[command(name = "fpid-worker")]
#[command(about = "Background task worker for the fingerprint identity store")]
#[command(version)]
struct Args {
    /// Path to config.toml
    #[arg(short, long, env = "FPID_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the SQLite database
    #[arg(short, long, env = "FPID_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume tasks until interrupted (default)
    Run,
    /// Add a task to the queue and exit
    Enqueue {
        /// Task name, e.g. update_stats
        name: String,
        /// Task arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let logging = Logging::init();
    let args = Args::parse();

    let config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    logging.apply_level(&config.logging.level);

    info!(
        "Starting fpid-worker v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let db_path = config.database_path(args.database.as_deref());
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path, &config.database)
        .await
        .context("Failed to open database")?;
    let queue = SqliteTaskQueue::new(pool.clone(), config.worker.poll_interval());

    match args.command.unwrap_or(Command::Run) {
        Command::Enqueue { name, args } => {
            let arguments: TaskArgs =
                serde_json::from_str(&args).context("Task arguments must be a JSON object")?;
            queue
                .enqueue(TaskRecord { name: name.clone(), arguments })
                .await
                .context("Failed to enqueue task")?;
            info!("Enqueued task {}", name);
        }
        Command::Run => {
            let registry = Arc::new(default_registry().context("Invalid task registry")?);
            let context = WorkerContext::new(pool, Arc::new(BitErrorComparator), config.cluster.role);
            let worker = Worker::new(
                Arc::new(queue),
                registry,
                context,
                WorkerSettings::from(&config.worker),
            );

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    shutdown_signal().await;
                    cancel.cancel();
                }
            });

            let stats = worker.run(cancel).await;
            info!(
                completed = stats.completed,
                failed = stats.failed,
                unknown = stats.unknown,
                "Worker shutdown complete"
            );
        }
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#![doc = include_str!("../README.md")]

mod runner;

use anyhow::Context;
use batchpool::WorkerPool;
use clap::Parser;
use runner::config::{CliArgs, RunnerConfig};
use runner::dispatch::{self, RunSummary};
use runner::telemetry::{init_telemetry, shutdown_telemetry};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunnerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let res = run(config).await;
    match &res {
        Ok(summary) => log_summary(summary),
        Err(e) => tracing::error!("Run failed: {e:#}"),
    }

    shutdown_telemetry(providers);
    res.map(|_| ())
}

async fn run(config: RunnerConfig) -> anyhow::Result<RunSummary> {
    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &config.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let pool = Arc::new(WorkerPool::with_config(config.pool.clone())?);
    pool.start()?;

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(shutdown_signal(shutdown.clone()));

    let summary = dispatch::run(
        Arc::clone(&pool),
        input,
        tokio::io::stdout(),
        config.submit_mode,
        shutdown,
    )
    .await;

    signals.abort();
    summary
}

fn log_startup_info(config: &RunnerConfig) {
    let source = config
        .input
        .as_ref()
        .map_or_else(|| "stdin".to_string(), |path| path.display().to_string());

    if cfg!(debug_assertions) {
        tracing::info!("Reading records from {source} with full config: {config:#?}");
    } else {
        tracing::info!(
            "Reading records from {source} with {} workers",
            config.pool.num_workers
        );
    }
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        submitted = summary.submitted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        rejected = summary.rejected,
        malformed = summary.malformed,
        interrupted = summary.interrupted,
        "Run finished"
    );
}

/// Cancels `shutdown` on Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, stopping the pool...");
    shutdown.cancel();
}

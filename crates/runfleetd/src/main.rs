//! runfleetd — drives the runfleet control loops.
//!
//! Production deployments embed the workspace crates behind their own
//! scheduler and cloud backend; this binary wires the loops against the
//! in-memory cloud backend for local rehearsal and operational dry runs.
//! The upstream side is real whenever `GITHUB_TOKEN` is set, and an
//! in-memory fake otherwise.
//!
//! # Usage
//!
//! ```text
//! runfleetd scale-up --batch batch.json
//! runfleetd scale-down --interval 60
//! runfleetd pool --interval 300
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use runfleet_cloud::{CloudClient, InMemoryCloud};
use runfleet_github::fake::{FakeFactory, FakeGithub};
use runfleet_github::{ScopedClientFactory, TokenAuthFactory};
use runfleet_model::config::ProcessEnv;
use runfleet_model::{BatchEntry, PoolConfig, RetryConfig, ScaleDownConfig, ScaleUpConfig};
use runfleet_pool::PoolManager;
use runfleet_retry::{InMemoryRetryQueue, JobRetry};
use runfleet_scaledown::ScaleDown;
use runfleet_scaleup::ScaleUp;

#[derive(Parser)]
#[command(name = "runfleetd", about = "runfleet scaling control loops")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume one scale-up batch and print the partial-batch outcome.
    ScaleUp {
        /// JSON file with the batch entries; `-` reads stdin.
        #[arg(long, default_value = "-")]
        batch: PathBuf,
    },

    /// Run the scale-down reaper on an interval.
    ScaleDown {
        /// Seconds between reaper passes.
        #[arg(long, default_value = "60")]
        interval: u64,
    },

    /// Run the idle-pool top-up loop on an interval.
    Pool {
        /// Seconds between pool evaluations.
        #[arg(long, default_value = "300")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,runfleetd=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::ScaleUp { batch } => run_scale_up(batch).await,
        Command::ScaleDown { interval } => run_scale_down(interval).await,
        Command::Pool { interval } => run_pool(interval).await,
    }
}

/// The upstream side is real when credentials are present.
fn github_factory() -> Arc<dyn ScopedClientFactory> {
    match std::env::var("GITHUB_TOKEN") {
        Ok(token) => {
            info!("using HTTP upstream client");
            Arc::new(TokenAuthFactory::new(std::env::var("GHES_URL").ok(), token))
        }
        Err(_) => {
            warn!("GITHUB_TOKEN not set, using in-memory upstream fake");
            Arc::new(FakeFactory::new(FakeGithub::new()))
        }
    }
}

async fn run_scale_up(batch_path: PathBuf) -> anyhow::Result<()> {
    let config = ScaleUpConfig::from_env(&ProcessEnv)?;
    let retry_config = RetryConfig::from_env(&ProcessEnv)?;
    let org_runners = config.org_runners;
    let cloud: Arc<dyn CloudClient> = Arc::new(InMemoryCloud::new());
    let factory = github_factory();
    let scaleup = ScaleUp::new(cloud, factory.clone(), config);

    let raw = if batch_path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(&batch_path)?
    };
    let batch: Vec<BatchEntry> = serde_json::from_str(&raw)?;
    info!(messages = batch.len(), "processing scale-up batch");

    let outcome = scaleup.handle_batch(batch.clone()).await;

    // Deferred messages get a best-effort retry probe; the queue layer
    // re-delivers whatever is republished.
    if retry_config.enable {
        let queue = Arc::new(InMemoryRetryQueue::new());
        let retry = JobRetry::new(factory, queue, retry_config, org_runners);
        for delivery_id in &outcome.retry_delivery_ids {
            if let Some(entry) = batch.iter().find(|e| &e.delivery_id == delivery_id) {
                retry.maybe_republish(&entry.message).await;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_scale_down(interval: u64) -> anyhow::Result<()> {
    let config = ScaleDownConfig::from_env(&ProcessEnv)?;
    let cloud: Arc<dyn CloudClient> = Arc::new(InMemoryCloud::new());
    let reaper = ScaleDown::new(cloud, github_factory(), config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        reaper.run(Duration::from_secs(interval), shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}

async fn run_pool(interval: u64) -> anyhow::Result<()> {
    let scaleup_config = ScaleUpConfig::from_env(&ProcessEnv)?;
    let pool_config = PoolConfig::from_env(&ProcessEnv)?;
    let cloud: Arc<dyn CloudClient> = Arc::new(InMemoryCloud::new());
    let factory = github_factory();

    let scaleup = Arc::new(ScaleUp::new(
        cloud.clone(),
        factory.clone(),
        scaleup_config.clone(),
    ));
    let pool = PoolManager::new(cloud, factory, scaleup, scaleup_config, pool_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        pool.run(Duration::from_secs(interval), shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}

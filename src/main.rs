//! Asset Monitor — Entry Point
//!
//! Wiring sequence:
//! 1. Load `.env`, parse the CLI
//! 2. Load scanners.toml + validate
//! 3. Init tracing (JSON structured logging)
//! 4. Build the monitor (limiters, price scanners, asset scanners)
//!    and wait for every scanner to initialise
//! 5. Load queries.toml and route each query to its scanner
//! 6. Run one scan (`scan`) or the cron loop (`monitor`) until Ctrl-C
//! 7. Close scanners and limiters

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use asset_monitor::adapters::metrics::{HealthServer, HealthState, MonitorMetrics};
use asset_monitor::adapters::persistence::JsonlBatchStore;
use asset_monitor::config::{AppConfig, loader};
use asset_monitor::domain::CronSchedule;
use asset_monitor::ports::BatchRepository;
use asset_monitor::usecases::AssetMonitor;

/// How often /ready re-checks the batch store.
const STORAGE_CHECK_PERIOD: Duration = Duration::from_secs(30);

/// Rate-limited multi-source balance scanner
#[derive(Parser, Debug)]
#[command(name = "asset-monitor", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Scanner configuration file
    #[arg(short, long, value_name = "FILE", default_value = "scanners.toml", global = true)]
    config: PathBuf,

    /// Query definitions file
    #[arg(short, long, value_name = "FILE", default_value = "queries.toml", global = true)]
    queries: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scan cycle, store it and exit (non-zero on any failure)
    Scan,

    /// Run scan cycles on the cron schedule until Ctrl-C
    Monitor {
        /// Override `monitor.cron`
        #[arg(long, value_name = "EXPR")]
        cron: Option<String>,
    },

    /// Print the most recently stored batch as JSON
    Latest,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Secrets referenced as ${VAR} in the config files live here
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── 1. Load configuration ───────────────────────────────
    let config = loader::load_config(&cli.config).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitor.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.monitor.name,
        version = env!("CARGO_PKG_VERSION"),
        asset_scanners = config.asset_scanners.len(),
        price_scanners = config.price_scanners.len(),
        rate_limiters = config.rate_limiters.len(),
        "Starting asset monitor"
    );

    let repository: Arc<dyn BatchRepository> = Arc::new(
        JsonlBatchStore::new(&config.persistence.data_dir)
            .await
            .context("Failed to open batch store")?,
    );

    match cli.command {
        Command::Latest => latest_command(repository.as_ref()).await,
        Command::Scan => scan_command(&config, &cli.queries, repository).await,
        Command::Monitor { cron } => monitor_command(&config, &cli.queries, repository, cron).await,
    }
}

/// Build the monitor, wait for its scanners and register every query.
async fn build_monitor(
    config: &AppConfig,
    queries: &Path,
    metrics: Arc<MonitorMetrics>,
) -> Result<AssetMonitor> {
    let monitor = AssetMonitor::from_config(config, Some(metrics)).context("Invalid scanner configuration")?;
    if let Err(e) = monitor.ready().await {
        monitor.close().await;
        return Err(e).context("Scanner initialisation failed");
    }
    for query in loader::load_queries(queries)? {
        monitor.add_query(query).context("Invalid query")?;
    }
    info!(
        scanners = monitor.scanner_names().len(),
        queries = monitor.query_count(),
        "Monitor ready"
    );
    Ok(monitor)
}

async fn scan_command(
    config: &AppConfig,
    queries: &Path,
    repository: Arc<dyn BatchRepository>,
) -> Result<ExitCode> {
    let metrics = Arc::new(MonitorMetrics::new()?);
    let monitor = build_monitor(config, queries, metrics).await?;

    let outcome = monitor.run_cycle(repository.as_ref()).await;
    monitor.close().await;

    match outcome {
        Ok(batch) if batch.result.is_complete() => {
            info!(batch_id = %batch.id, "Scan complete");
            Ok(ExitCode::SUCCESS)
        }
        Ok(batch) => {
            warn!(
                batch_id = %batch.id,
                failures = batch.result.failures.len(),
                "Scan stored with failed queries"
            );
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Scan cycle failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn monitor_command(
    config: &AppConfig,
    queries: &Path,
    repository: Arc<dyn BatchRepository>,
    cron: Option<String>,
) -> Result<ExitCode> {
    let schedule = CronSchedule::parse(cron.as_deref().unwrap_or(&config.monitor.cron))?;
    let metrics = Arc::new(MonitorMetrics::new()?);
    let monitor = Arc::new(build_monitor(config, queries, Arc::clone(&metrics)).await?);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let health = HealthState::new(Arc::clone(&metrics));

    // ── Health/metrics server ───────────────────────────────
    let health_handle = if config.metrics.enabled {
        tokio::spawn(health.clone().watch_storage(
            Arc::clone(&repository),
            STORAGE_CHECK_PERIOD,
            shutdown_tx.subscribe(),
        ));
        let server = HealthServer::new(health.clone(), config.metrics.bind_address.clone());
        let server_shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(server_shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }))
    } else {
        None
    };

    // ── Cron loop ───────────────────────────────────────────
    let monitor_handle = tokio::spawn(Arc::clone(&monitor).monitor(
        schedule,
        repository,
        shutdown_tx.subscribe(),
    ));

    signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("SIGINT received, initiating graceful shutdown");

    health.running.store(false, Ordering::SeqCst);
    let _ = shutdown_tx.send(());

    match monitor_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %format!("{e:#}"), "Monitor loop failed"),
        Err(e) => error!(error = %e, "Monitor task aborted"),
    }
    monitor.close().await;

    if let Some(handle) = health_handle {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

async fn latest_command(repository: &dyn BatchRepository) -> Result<ExitCode> {
    match repository.latest_batch().await? {
        Some(batch) => {
            println!("{}", serde_json::to_string_pretty(&batch)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            warn!("No batch stored yet");
            Ok(ExitCode::FAILURE)
        }
    }
}

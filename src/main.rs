//! tracker-sim: run the tracker engine against simulated devices
//!
//! # Usage
//!
//! ```bash
//! # Ten work cycles, a 30 s cycle compressed to 300 ms
//! cargo run -- --cycles 10 --time-scale 0.01
//!
//! # Lossy uplink: a quarter of all publishes time out
//! cargo run -- --failure-rate 0.25 --seed 7
//!
//! # Plain telemetry platform
//! cargo run -- --telemetry
//! ```
//!
//! # Environment Variables
//!
//! - `TRACKER_CONFIG`: Path to tracker.toml (default: ./tracker.toml, then built-in defaults)
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe the data directory on startup

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tracker_engine::config::{ReportFormat, TrackerConfig};
use tracker_engine::settings::SledSettings;
use tracker_engine::simulation::{
    SimAlarm, SimCloud, SimGnss, SimulatedDevices, DEFAULT_GNSS_READING,
};
use tracker_engine::storage::{HistoryStore, SledHistory};
use tracker_engine::Tracker;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tracker-sim")]
#[command(about = "Cellular tracker business engine on simulated devices")]
#[command(version)]
struct CliArgs {
    /// Path to a tracker.toml (overrides TRACKER_CONFIG and ./tracker.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override storage.data_dir
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Stop after this many completed cycles (0 = run until Ctrl+C)
    #[arg(long, default_value = "0")]
    cycles: u32,

    /// Multiplier applied to wake delays (1 = realtime)
    #[arg(long, default_value = "0.01")]
    time_scale: f64,

    /// Probability that a publish times out
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Seed for failure injection and GNSS wander
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Report plain telemetry instead of the thing model
    #[arg(long)]
    telemetry: bool,

    /// Wipe the data directory before starting.
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long, env = "RESET_DB")]
    reset_db: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TrackerConfig::load(),
    };
    if let Some(dir) = args.data_dir.clone() {
        config.storage.data_dir = dir;
    }
    if args.telemetry {
        config.platform.report_format = ReportFormat::Telemetry;
    }
    config.validate().context("Invalid tracker configuration")?;

    let data_dir = config.storage.data_dir.clone();
    if args.reset_db && data_dir.exists() {
        warn!(path = %data_dir.display(), "Resetting data directory");
        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to remove {}", data_dir.display()))?;
    }
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    // One database, two trees: settings and offline history
    let db = sled::open(data_dir.join("tracker.db")).context("Failed to open tracker database")?;
    let settings = Arc::new(SledSettings::from_db(&db).context("Failed to open settings")?);
    let history = Arc::new(SledHistory::from_db(&db).context("Failed to open offline history")?);
    let buffered = history.len().context("Failed to read offline history")?;

    info!(
        project = %config.device.project_name,
        version = %config.device.project_version,
        format = %config.platform.report_format,
        data_dir = %data_dir.display(),
        buffered,
        "Tracker simulator starting"
    );

    let mut sim = SimulatedDevices::with_cloud(
        SimAlarm::timer(args.time_scale),
        SimCloud::with_failure_rate(args.failure_rate, args.seed),
    );
    sim.gnss = Arc::new(SimGnss::wandering(DEFAULT_GNSS_READING, args.seed));

    let (tracker, worker) = Tracker::new(config, sim.collaborators(settings, history.clone()));

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let worker_handle = tokio::spawn(worker.run(cancel_token.clone()));
    tracker.start_cycle();

    // Every completed cycle ends by arming the wake alarm
    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                if args.cycles > 0 && sim.alarm.arm_count() >= args.cycles {
                    info!(cycles = args.cycles, "Cycle limit reached");
                    cancel_token.cancel();
                    break;
                }
            }
        }
    }

    let stats = worker_handle.await.context("Worker task panicked")?;
    let ota = tracker.ota_info().context("Failed to read OTA status")?;
    info!(
        processed = stats.processed,
        failed = stats.failed,
        panicked = stats.panicked,
        buffered = history.len().context("Failed to read offline history")?,
        published = sim.cloud.published().len(),
        ota_status = %ota.status,
        "Tracker simulator stopped"
    );
    Ok(())
}

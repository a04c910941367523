// Copyright (c) 2026 RoutePulse Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/routepulse/routepulse-rs

//! RoutePulse - Freight Corridor Carbon Telemetry
//!
//! Streams per-vehicle freight telemetry through tumbling-window CO2
//! analytics and anomaly detection, publishing a JSONL summary feed
//! for downstream dashboards.
//!
//! Runs the built-in fleet simulator by default; pass --replay to feed
//! recorded telemetry instead.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use routepulse::{Config, VERSION};

/// RoutePulse - Freight Corridor Carbon Telemetry
#[derive(Parser, Debug)]
#[command(name = "routepulse")]
#[command(author = "RoutePulse Project")]
#[command(version = VERSION)]
#[command(about = "Real-time freight emission analytics pipeline")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Demo mode with the built-in fleet simulator
    #[arg(long)]
    demo: bool,

    /// Replay telemetry from a JSONL file instead of simulating
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Summary feed output path
    #[arg(long)]
    feed: Option<PathBuf>,

    /// Fixed simulator seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🛰  RoutePulse v{} - Freight Corridor Carbon Telemetry", VERSION);

    // Load or create configuration
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(feed) = args.feed {
        config.publisher.feed_path = feed;
    }
    if args.seed.is_some() {
        config.simulator.seed = args.seed;
    }
    config.validate()?;

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, args.replay, args.duration))
}

/// Wires the bus, publisher, alert logger and engine together, then
/// runs until the source ends or shutdown is signalled.
async fn run(config: Config, replay: Option<PathBuf>, duration: Option<u64>) -> Result<()> {
    use routepulse::core::{EventBus, PipelineEngine, PipelineStats};
    use routepulse::detection::AlertLog;
    use routepulse::routes::CorridorTable;
    use routepulse::streaming::SnapshotPublisher;
    use routepulse::telemetry::{FleetSimulator, JsonlSource, TelemetrySource};
    use tokio::sync::broadcast;

    let config = Arc::new(config);
    let corridors = Arc::new(CorridorTable::builtin());
    let bus = Arc::new(EventBus::new(1024));
    let stats = Arc::new(PipelineStats::default());
    let alert_log = Arc::new(AlertLog::new(config.alerts.alert_log_capacity));

    // Summary feed publisher
    let publisher = SnapshotPublisher::new(config.publisher.clone());
    let snapshot_rx = bus.subscribe_snapshots();
    let publisher_stats = stats.clone();
    let publisher_handle = tokio::spawn(async move {
        if let Err(err) = publisher.run(snapshot_rx, publisher_stats).await {
            warn!("snapshot publisher stopped: {err}");
        }
    });

    // Alert feed to the operator log
    let mut alert_rx = bus.subscribe_alerts();
    let alert_handle = tokio::spawn(async move {
        loop {
            match alert_rx.recv().await {
                Ok(alert) => {
                    warn!("[{}] {} {}", alert.kind, alert.vehicle_id, alert.detail);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("alert logger lagged by {n} alerts");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Heartbeat with the pipeline counters
    let heartbeat_stats = stats.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let totals = heartbeat_stats.snapshot();
            info!(
                "Pipeline: {} events in ({} rejected, {} late), {} windows closed, {} alerts, {} snapshots out",
                totals.events_ingested,
                totals.events_rejected,
                totals.late_drops,
                totals.windows_closed,
                totals.total_alerts(),
                totals.snapshots_published,
            );
        }
    });

    let source: Box<dyn TelemetrySource> = match replay {
        Some(path) => Box::new(JsonlSource::open(&path).await?),
        None if config.demo_mode => {
            Box::new(FleetSimulator::new(&config.simulator, corridors.clone()))
        }
        None => anyhow::bail!("no telemetry source: enable demo_mode or pass --replay <file>"),
    };

    // Ctrl+C or --duration stops the engine
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received...");
            let _ = signal_tx.send(());
        }
    });
    if let Some(secs) = duration {
        let timer_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
            info!("Run duration of {secs}s elapsed, stopping");
            let _ = timer_tx.send(());
        });
    }

    info!("🚚 RoutePulse pipeline running");
    info!("   Press Ctrl+C to shutdown");

    let engine = PipelineEngine::new(
        config.clone(),
        corridors,
        bus.clone(),
        stats.clone(),
        alert_log,
    );
    engine.run(source, shutdown_rx).await?;

    // Dropping the remaining bus handles closes the broadcast channels,
    // letting the publisher and alert tasks drain and exit.
    drop(engine);
    drop(bus);
    publisher_handle.await?;
    alert_handle.await?;

    let totals = stats.snapshot();
    info!(
        "Final counts: {} ingested, {} rejected, {} late, {} windows closed, {} alerts, {} snapshots published ({} dropped)",
        totals.events_ingested,
        totals.events_rejected,
        totals.late_drops,
        totals.windows_closed,
        totals.total_alerts(),
        totals.snapshots_published,
        totals.snapshots_dropped,
    );
    info!("RoutePulse shutdown complete");

    Ok(())
}

//! drone_watchd - drone video violence alerts + HLS relay
//!
//! This daemon:
//! 1. Loads the drone registry and the frame classifier
//! 2. Runs one ingestion worker per drone, publishing verdicts to the alert store
//! 3. Serves alerts, system status and relayed HLS media over HTTP
//! 4. Logs worker health until SIGINT/SIGTERM, then shuts down cleanly

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use drone_watch::{
    classify, AlertStore, ApiServer, ApiState, CaptureOpener, DaemonConfig,
    DefaultCaptureOpener, MediaRelay, ModelStatus, ShutdownSignal, SourceRegistry, Supervisor,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Classify live drone video for violence and relay the drones' HLS streams"
)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "DRONE_WATCH_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = DaemonConfig::load_from(args.config.as_deref())?;

    let registry = Arc::new(SourceRegistry::load(&cfg.sources_path)?);

    let classifier = classify::load_optional(&cfg.classifier);
    let model_status = ModelStatus::of(classifier.as_ref());

    let alerts = AlertStore::new();
    let shutdown = ShutdownSignal::new();

    let opener: Arc<dyn CaptureOpener> = Arc::new(DefaultCaptureOpener);
    let supervisor = Supervisor::spawn(
        &registry,
        classifier,
        opener,
        &alerts,
        cfg.worker,
        shutdown.clone(),
    )?;

    let relay = MediaRelay::new(registry.clone(), &cfg.relay)?;
    let state = ApiState {
        alerts: alerts.clone(),
        relay,
        model_status,
        source_count: registry.len(),
    };
    let api_handle = ApiServer::new(cfg.api.clone(), state).spawn(shutdown.clone())?;
    log::info!("drone api listening on {}", api_handle.addr);

    let signal = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || signal.trigger()) {
        log::warn!("failed to install signal handler: {}", err);
    }

    log::info!(
        "drone_watchd running. model={:?} workers={}",
        model_status,
        supervisor.len()
    );

    while !shutdown.wait(HEALTH_LOG_INTERVAL) {
        let running = supervisor.running();
        for (id, stats) in supervisor.stats() {
            log::info!(
                "worker {} running={} frames={} capture_failures={} processing_errors={} alert={}",
                id,
                running.contains(&id),
                stats.frames_classified,
                stats.capture_failures,
                stats.processing_errors,
                alerts.get(id).label.description()
            );
        }
    }

    log::info!("shutting down");
    if let Err(err) = api_handle.stop() {
        log::error!("{}", err);
    }
    supervisor.shutdown();
    log::info!("drone_watchd stopped");
    Ok(())
}

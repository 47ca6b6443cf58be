//! Supervisor for the `serve` command: wires the frame source, the monitor,
//! the housekeeping ticker and the HTTP server, then waits for Ctrl+C.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use ml_core::{HttpPoseModel, NullPoseModel, PoseModel};
use monitor::{Monitor, MonitorConfig, pipeline::telemetry, spawn_housekeeping};
use tracing::{info, warn};

use crate::server::spawn_http_server;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

pub fn run(config: MonitorConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let _ = telemetry::init_metrics_recorder();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let serve_span = tracing::info_span!(
        "robowatch.serve",
        source = config.source.as_deref().unwrap_or("http"),
        width = config.capture_width,
        height = config.capture_height,
        port = config.port,
    );
    let _serve_guard = serve_span.enter();

    let model = pose_model(&config)?;
    let monitor = Arc::new(
        Monitor::new(config.clone(), model).context("Failed to initialise monitor")?,
    );

    let running = Arc::new(AtomicBool::new(true));
    let ingest_handle = match config.source.as_deref() {
        Some(uri) => {
            let frames = video_ingest::spawn_ffmpeg_reader(
                uri,
                (config.capture_width, config.capture_height),
            )
            .with_context(|| format!("Failed to start capture from {uri}"))?;
            Some(
                video_ingest::spawn_slot_feeder(frames, monitor.frame_slot(), running.clone())
                    .context("Failed to spawn frame ingestion thread")?,
            )
        }
        None => {
            info!("no --source given; waiting for frames on POST /frame");
            None
        }
    };

    let processing = monitor
        .start_processing()
        .context("Failed to spawn processing thread")?;
    let housekeeping = spawn_housekeeping(monitor.clone(), config.metrics_flush, running.clone())
        .context("Failed to spawn housekeeping thread")?;
    let server = spawn_http_server(monitor.clone(), &config.bind, config.port)
        .context("Failed to start HTTP server")?;

    info!(
        "Dashboard at http://{}:{}/ , press Ctrl+C to stop",
        config.bind, config.port
    );

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(SHUTDOWN_POLL);
    }

    info!("Stopping robowatch");
    server.stop();
    running.store(false, Ordering::SeqCst);
    processing.stop();
    if housekeeping.join().is_err() {
        warn!("housekeeping thread panicked");
    }
    if let Some(handle) = ingest_handle {
        if handle.join().is_err() {
            warn!("frame ingestion thread panicked");
        }
    }
    Ok(())
}

fn pose_model(config: &MonitorConfig) -> Result<Arc<dyn PoseModel>> {
    match config.model_url.as_deref() {
        Some(url) => {
            let model = HttpPoseModel::new(url)
                .with_context(|| format!("Failed to build pose model client for {url}"))?
                .with_jpeg_quality(config.jpeg_quality);
            info!("pose model at {url}");
            Ok(Arc::new(model))
        }
        None => {
            warn!("no --model-url given; nobody will ever be detected");
            Ok(Arc::new(NullPoseModel))
        }
    }
}

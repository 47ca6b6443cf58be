//! Configuration parsing for the monitor.
//!
//! This module owns translation of CLI arguments into a `MonitorConfig` struct
//! which the pipeline, the sensor path and the server use without re-parsing
//! flags.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Result, bail};
use clap::Args;

use crate::{
    fusion::FusionConfig,
    pipeline::stream_health::{DEFAULT_DUPLICATE_THRESHOLD, DEFAULT_FREEZE_THRESHOLD, HealthConfig},
    recording::DEFAULT_RECORD_FPS,
};

const DEFAULT_CAPTURE_WIDTH: u32 = 1280;
const DEFAULT_CAPTURE_HEIGHT: u32 = 960;
const DEFAULT_POLL_MS: u64 = 20;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_METRICS_FLUSH_SECS: u64 = 30;
const DEFAULT_PORT: u16 = 5000;

#[derive(Clone, Debug)]
/// Canonical configuration shared by every part of the monitor.
pub struct MonitorConfig {
    /// ffmpeg-readable video source; frames may also be pushed over HTTP.
    pub source: Option<String>,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Pose inference endpoint; without one nobody is ever detected.
    pub model_url: Option<String>,
    /// Root for the sensor CSV, saved frames, recordings and the metrics file.
    pub data_dir: PathBuf,
    pub bind: String,
    pub port: u16,
    pub health: HealthConfig,
    pub fusion: FusionConfig,
    /// Cadence of the processing loop.
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    pub record_fps: f64,
    pub metrics_flush: Duration,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Default, Args)]
pub struct MonitorCliArgs {
    /// Video source URI, device index or file path.
    #[arg(long = "source", value_name = "URI")]
    pub source: Option<String>,
    /// Capture width in pixels.
    #[arg(long = "capture-width", value_name = "PX")]
    pub capture_width: Option<u32>,
    /// Capture height in pixels.
    #[arg(long = "capture-height", value_name = "PX")]
    pub capture_height: Option<u32>,
    /// HTTP pose model endpoint.
    #[arg(long = "model-url", value_name = "URL")]
    pub model_url: Option<String>,
    /// Directory for persisted data.
    #[arg(long = "data-dir", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
    /// Address the preview server binds to.
    #[arg(long = "bind", value_name = "ADDR")]
    pub bind: Option<String>,
    /// Port the preview server listens on.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,
    /// Repeated frames tolerated before the stream counts as offline.
    #[arg(long = "duplicate-threshold", value_name = "N")]
    pub duplicate_threshold: Option<u32>,
    /// Seconds a frozen stream may last before it counts as offline.
    #[arg(long = "freeze-seconds", value_name = "SECS")]
    pub freeze_seconds: Option<f64>,
    /// Minimum seconds between two counted falls of one heuristic.
    #[arg(long = "fall-cooldown", value_name = "SECS")]
    pub fall_cooldown: Option<f64>,
    /// Minimum seconds between two people-count increments.
    #[arg(long = "person-cooldown", value_name = "SECS")]
    pub person_cooldown: Option<f64>,
    /// Processing loop period in milliseconds.
    #[arg(long = "poll-ms", value_name = "MS")]
    pub poll_ms: Option<u64>,
    /// JPEG quality used for previews and saved frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,
    /// Frame rate of recorded video.
    #[arg(long = "record-fps", value_name = "FPS")]
    pub record_fps: Option<f64>,
    /// Seconds between metrics snapshots written to disk.
    #[arg(long = "metrics-flush-secs", value_name = "SECS")]
    pub metrics_flush_secs: Option<u64>,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<MonitorCliArgs> for MonitorConfig {
    type Error = anyhow::Error;

    fn try_from(args: MonitorCliArgs) -> Result<Self> {
        let capture_width = args.capture_width.unwrap_or(DEFAULT_CAPTURE_WIDTH);
        let capture_height = args.capture_height.unwrap_or(DEFAULT_CAPTURE_HEIGHT);
        if capture_width == 0 || capture_height == 0 {
            bail!("Capture width and height must be positive integers");
        }

        let duplicate_threshold = args
            .duplicate_threshold
            .unwrap_or(DEFAULT_DUPLICATE_THRESHOLD);
        if duplicate_threshold == 0 {
            bail!("--duplicate-threshold must be at least 1");
        }

        let freeze_threshold = match args.freeze_seconds {
            Some(secs) => positive_secs(secs, "--freeze-seconds")?,
            None => DEFAULT_FREEZE_THRESHOLD,
        };

        let defaults = FusionConfig::default();
        let fall_cooldown = match args.fall_cooldown {
            Some(secs) => non_negative_secs(secs, "--fall-cooldown")?,
            None => defaults.fall_cooldown,
        };
        let person_cooldown = match args.person_cooldown {
            Some(secs) => non_negative_secs(secs, "--person-cooldown")?,
            None => defaults.person_cooldown,
        };

        let poll_ms = args.poll_ms.unwrap_or(DEFAULT_POLL_MS);
        if poll_ms == 0 {
            bail!("--poll-ms must be at least 1");
        }

        let jpeg_quality = args.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let record_fps = args.record_fps.unwrap_or(DEFAULT_RECORD_FPS);
        if !(record_fps.is_finite() && record_fps > 0.0) {
            bail!("--record-fps must be positive");
        }

        let metrics_flush_secs = args
            .metrics_flush_secs
            .unwrap_or(DEFAULT_METRICS_FLUSH_SECS);
        if metrics_flush_secs == 0 {
            bail!("--metrics-flush-secs must be at least 1");
        }

        if let Some(url) = args.model_url.as_deref() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("--model-url must be an http(s) URL");
            }
        }

        Ok(Self {
            source: args.source,
            capture_width,
            capture_height,
            model_url: args.model_url,
            data_dir: args.data_dir.unwrap_or_else(|| PathBuf::from("robowatch_data")),
            bind: args.bind.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: args.port.unwrap_or(DEFAULT_PORT),
            health: HealthConfig {
                duplicate_threshold,
                freeze_threshold,
            },
            fusion: FusionConfig {
                fall_cooldown,
                person_cooldown,
                ..defaults
            },
            poll_interval: Duration::from_millis(poll_ms),
            jpeg_quality,
            record_fps,
            metrics_flush: Duration::from_secs(metrics_flush_secs),
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

impl MonitorConfig {
    /// Defaults for every option, storing data under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: None,
            capture_width: DEFAULT_CAPTURE_WIDTH,
            capture_height: DEFAULT_CAPTURE_HEIGHT,
            model_url: None,
            data_dir: data_dir.into(),
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            health: HealthConfig::default(),
            fusion: FusionConfig::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            record_fps: DEFAULT_RECORD_FPS,
            metrics_flush: Duration::from_secs(DEFAULT_METRICS_FLUSH_SECS),
            telemetry: TelemetryOptions::default(),
        }
    }

    pub fn csv_path(&self) -> PathBuf {
        self.data_dir.join("sensor_data_master.csv")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.data_dir.join("frames")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.data_dir.join("metrics.json")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn positive_secs(secs: f64, flag: &str) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        bail!("{flag} must be a positive number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}

fn non_negative_secs(secs: f64, flag: &str) -> Result<Duration> {
    if !(secs.is_finite() && secs >= 0.0) {
        bail!("{flag} must be zero or a positive number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}

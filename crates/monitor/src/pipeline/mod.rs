//! Video side of the monitor.
//!
//! - `config`: CLI configuration parsing.
//! - `stream_health`: LIVE/FROZEN/OFFLINE classification and dwell accounting.
//! - `compose`: the 2x2 annotated grid and the offline placeholder.
//! - `processor`: one poll of the frame slot through fusion and rendering.
//! - `runner`: the processing thread.
//! - `telemetry`: tracing subscribers and the Prometheus recorder.
//! - `vision_mode`: the operator's timed fullscreen/glasses switch.

pub mod compose;
pub mod config;
pub mod processor;
pub mod runner;
pub mod stream_health;
pub mod telemetry;
pub mod vision_mode;

pub use config::{MonitorCliArgs, MonitorConfig, TelemetryOptions};
pub use processor::{FramePacket, FrameProcessor, FrameSummary, SharedPacket};
pub use runner::{ProcessingLoop, latest_packet};
pub use stream_health::{HealthConfig, StreamHealthMonitor, StreamPoll, StreamState};
pub use vision_mode::{VisionMode, VisionModeStatus, VisionModeSwitch};

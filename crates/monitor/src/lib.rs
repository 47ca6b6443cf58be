//! Robot-mounted fall monitor.
//!
//! Frames land in a [`video_ingest::FrameSlot`]; the processing loop classifies
//! stream health, fuses several fall heuristics over the pose model's output,
//! renders a preview grid and feeds the optional recording. Sensor messages are
//! reduced, logged to CSV and broadcast. Every observable change flows through
//! the [`events::EventBus`].

pub mod error;
pub mod events;
pub mod fusion;
pub mod housekeeping;
pub mod monitor;
pub mod pipeline;
pub mod recording;
pub mod sensors;

pub use error::MonitorError;
pub use events::{EventBus, EventSubscriber, MetricValue, MetricsSnapshot, MetricsStore, MonitorEvent};
pub use housekeeping::spawn_housekeeping;
pub use monitor::{Monitor, MonitorStatus};
pub use pipeline::{
    MonitorCliArgs, MonitorConfig, ProcessingLoop, StreamState, VisionMode, VisionModeStatus,
};
pub use recording::{RecordingController, RecordingStatus};

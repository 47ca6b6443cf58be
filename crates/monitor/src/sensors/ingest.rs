//! Handling of one decoded sensor/position message from the robot.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use video_ingest::{Frame, FrameSlot};

use crate::{
    error::MonitorError,
    events::{
        EventBus, MetricsStore, MonitorEvent,
        metrics::{CSV_ROWS_WRITTEN, RECORD_TRIGGERS},
    },
    sensors::{RobotPosition, SensorSnapshot, csv_log::CsvAccumulator, format::parse_raw},
};

pub const SENSOR_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FRAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Labels a reduced sensor vector for the map overlay.
pub trait SensorClassifier: Send + Sync {
    fn classify(&self, values: &[f64]) -> String;
}

/// Classifier that always answers with the same label.
#[derive(Debug, Clone)]
pub struct FixedLabelClassifier {
    label: String,
}

impl FixedLabelClassifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Default for FixedLabelClassifier {
    fn default() -> Self {
        Self::new("ambient")
    }
}

impl SensorClassifier for FixedLabelClassifier {
    fn classify(&self, _values: &[f64]) -> String {
        self.label.clone()
    }
}

#[derive(Debug, Default, Deserialize)]
struct SensorMessage {
    #[serde(default)]
    values: Option<Value>,
    /// Only a literal `true` asks for a recording.
    #[serde(default)]
    should_record: Option<Value>,
    #[serde(default)]
    current_position: Option<Value>,
}

/// What one message produced. Mostly useful to callers that want to log or test.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    pub position: Option<RobotPosition>,
    pub snapshot: Option<Arc<SensorSnapshot>>,
    pub record_triggered: bool,
    pub row_written: bool,
}

pub struct SensorIngest {
    bus: Arc<EventBus>,
    metrics: Arc<MetricsStore>,
    csv: CsvAccumulator,
    frames_dir: PathBuf,
    slot: Arc<FrameSlot>,
    classifier: Box<dyn SensorClassifier>,
    jpeg_quality: u8,
    state: Mutex<IngestState>,
}

#[derive(Debug, Default)]
struct IngestState {
    last_should_record: bool,
    latest: Option<Arc<SensorSnapshot>>,
}

impl SensorIngest {
    pub fn new(
        bus: Arc<EventBus>,
        metrics: Arc<MetricsStore>,
        csv: CsvAccumulator,
        frames_dir: impl Into<PathBuf>,
        slot: Arc<FrameSlot>,
    ) -> Self {
        Self {
            bus,
            metrics,
            csv,
            frames_dir: frames_dir.into(),
            slot,
            classifier: Box::new(FixedLabelClassifier::default()),
            jpeg_quality: 85,
            state: Mutex::new(IngestState::default()),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn SensorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Most recent accepted snapshot.
    pub fn latest(&self) -> Option<Arc<SensorSnapshot>> {
        self.state.lock().ok()?.latest.clone()
    }

    /// Parse a message from its JSON text and ingest it.
    pub fn ingest_str(&self, message: &str) -> Result<IngestReport, MonitorError> {
        let value: Value = serde_json::from_str(message)?;
        self.ingest_message(&value)
    }

    /// Apply one decoded message: position broadcast, sensor reduction and,
    /// when the robot asks for it, frame capture plus a CSV row.
    ///
    /// Messages are applied one at a time so the rising-edge detection on
    /// `should_record` sees them in arrival order.
    pub fn ingest_message(&self, message: &Value) -> Result<IngestReport, MonitorError> {
        let message: SensorMessage = serde_json::from_value(message.clone())?;
        let should_record = matches!(message.should_record, Some(Value::Bool(true)));
        let mut state = self
            .state
            .lock()
            .map_err(|_| std::io::Error::other("sensor ingest lock poisoned"))?;
        let timestamp = Local::now().format(SENSOR_TIMESTAMP_FORMAT).to_string();
        let mut report = IngestReport::default();

        report.position = message.current_position.as_ref().and_then(parse_position);
        if let Some(pos) = report.position {
            self.bus
                .publish(MonitorEvent::RobotPositionUpdate { x: pos.x, y: pos.y });
            debug!(x = pos.x, y = pos.y, "robot position update");
        }

        let Some(values) = message.values.as_ref() else {
            return Ok(report);
        };
        let raw = match parse_raw(values) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("dropping sensor message at {timestamp}: {err}");
                return Ok(report);
            }
        };

        let frame_filename = if should_record {
            if !state.last_should_record {
                self.metrics.increment(RECORD_TRIGGERS);
                report.record_triggered = true;
                info!("sensor recording triggered");
            }
            self.save_latest_frame()
        } else {
            None
        };
        state.last_should_record = should_record;

        let snapshot = Arc::new(SensorSnapshot::from_raw(
            timestamp.clone(),
            raw,
            report.position,
            frame_filename,
        )?);
        self.bus.publish(MonitorEvent::SensorUpdate {
            timestamp: timestamp.clone(),
            values: snapshot.values.clone(),
        });

        if should_record {
            match self.csv.append(&snapshot) {
                Ok(()) => {
                    self.metrics.increment(CSV_ROWS_WRITTEN);
                    report.row_written = true;
                }
                Err(err) => error!("failed to append sensor row: {err}"),
            }

            if let Some(pos) = report.position {
                let class = self.classifier.classify(&snapshot.values);
                debug!(%class, "classified sensor reading");
                self.bus.publish(MonitorEvent::MapDotUpdate {
                    x: pos.x,
                    y: pos.y,
                    class,
                    timestamp,
                });
            }
        }

        state.latest = Some(snapshot.clone());
        report.snapshot = Some(snapshot);
        Ok(report)
    }

    fn save_latest_frame(&self) -> Option<String> {
        let frame = self.slot.latest()?;
        let filename = format!("frame_{}.jpg", Local::now().format(FRAME_TIMESTAMP_FORMAT));
        let path = self.frames_dir.join(&filename);
        match write_jpeg(&frame, &path, self.jpeg_quality) {
            Ok(()) => {
                info!("saved frame {}", path.display());
                Some(filename)
            }
            Err(err) => {
                error!("failed to save frame {}: {err}", path.display());
                None
            }
        }
    }
}

fn write_jpeg(frame: &Frame, path: &Path, quality: u8) -> Result<(), MonitorError> {
    let rgb = frame.decode()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    JpegEncoder::new_with_quality(file, quality).encode_image(&rgb)?;
    Ok(())
}

fn parse_position(value: &Value) -> Option<RobotPosition> {
    let x = value.get("x")?.as_f64()?;
    let y = value.get("y")?.as_f64()?;
    Some(RobotPosition { x, y })
}

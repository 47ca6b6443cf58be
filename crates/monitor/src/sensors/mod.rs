//! Sensor telemetry: channel reduction, CSV persistence and message ingestion.

use serde::{Deserialize, Serialize};

pub mod csv_log;
pub mod format;
pub mod ingest;

pub use csv_log::CsvAccumulator;
pub use format::{SensorError, format_values, parse_raw};
pub use ingest::{FixedLabelClassifier, IngestReport, SensorClassifier, SensorIngest};

/// Robot position in map coordinates, as reported by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotPosition {
    pub x: f64,
    pub y: f64,
}

/// One accepted sensor reading. Shared behind an `Arc` once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub timestamp: String,
    /// Reduced vector: grouped averages then temperature and humidity.
    pub values: Vec<f64>,
    pub raw: Vec<f64>,
    pub position: Option<RobotPosition>,
    pub frame_filename: Option<String>,
}

impl SensorSnapshot {
    /// Validate and reduce `raw`, keeping it alongside the reduced values.
    pub fn from_raw(
        timestamp: impl Into<String>,
        raw: Vec<f64>,
        position: Option<RobotPosition>,
        frame_filename: Option<String>,
    ) -> Result<Self, SensorError> {
        let values = format_values(&raw)?;
        Ok(Self {
            timestamp: timestamp.into(),
            values,
            raw,
            position,
            frame_filename,
        })
    }
}

use thiserror::Error;

use crate::{recording::RecordingError, sensors::SensorError};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Capture(#[from] video_ingest::CaptureError),
    #[error("invalid sensor data: {0}")]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, info, warn};

use crate::{
    error::MonitorError,
    sensors::{
        SensorSnapshot,
        format::{RAW_CHANNELS, SensorError},
    },
};

/// Append-only CSV log of sensor snapshots.
///
/// The header is written only when the file is created (or found empty), so
/// restarting the process keeps appending to the same table.
#[derive(Debug)]
pub struct CsvAccumulator {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvAccumulator {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MonitorError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(header())?;
            writer.flush()?;
            info!("created sensor log at {}", path.display());
        } else {
            debug!("appending to existing sensor log {}", path.display());
        }
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one row and flush it. Snapshots with a raw vector of the wrong
    /// width are logged and rejected.
    pub fn append(&self, snapshot: &SensorSnapshot) -> Result<(), MonitorError> {
        if snapshot.raw.len() != RAW_CHANNELS {
            warn!(
                "rejecting sensor row at {}: {} raw values, expected {}",
                snapshot.timestamp,
                snapshot.raw.len(),
                RAW_CHANNELS
            );
            return Err(SensorError::Length {
                expected: RAW_CHANNELS,
                got: snapshot.raw.len(),
            }
            .into());
        }

        let mut record = Vec::with_capacity(RAW_CHANNELS + 4);
        record.push(snapshot.timestamp.clone());
        record.extend(snapshot.raw.iter().map(|v| v.to_string()));
        match snapshot.position {
            Some(pos) => {
                record.push(pos.x.to_string());
                record.push(pos.y.to_string());
            }
            None => {
                record.push(String::new());
                record.push(String::new());
            }
        }
        record.push(snapshot.frame_filename.clone().unwrap_or_default());

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("csv writer lock poisoned"))?;
        writer.write_record(&record)?;
        writer.flush()?;
        Ok(())
    }
}

fn header() -> Vec<String> {
    std::iter::once("timestamp".to_string())
        .chain((0..RAW_CHANNELS).map(|i| format!("value_{i}")))
        .chain(["x_position", "y_position", "frame_filename"].map(String::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::RobotPosition;

    fn snapshot(raw: Vec<f64>) -> SensorSnapshot {
        SensorSnapshot {
            timestamp: "2024-05-01 12:00:00".into(),
            values: Vec::new(),
            raw,
            position: Some(RobotPosition { x: 1.5, y: -2.0 }),
            frame_filename: Some("frame_x.jpg".into()),
        }
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn header_is_written_once_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sensor.csv");

        let log = CsvAccumulator::open(&path).unwrap();
        log.append(&snapshot(vec![0.5; RAW_CHANNELS])).unwrap();
        drop(log);

        let log = CsvAccumulator::open(&path).unwrap();
        log.append(&snapshot(vec![1.0; RAW_CHANNELS])).unwrap();

        let lines = lines(&path);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,value_0,value_1,"));
        assert!(lines[0].ends_with("value_65,x_position,y_position,frame_filename"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("timestamp")).count(), 1);
    }

    #[test]
    fn rows_carry_raw_values_position_and_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.csv");
        let log = CsvAccumulator::open(&path).unwrap();
        log.append(&snapshot(vec![2.0; RAW_CHANNELS])).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.len(), RAW_CHANNELS + 4);
        assert_eq!(&row[0], "2024-05-01 12:00:00");
        assert_eq!(&row[1], "2");
        assert_eq!(&row[RAW_CHANNELS + 1], "1.5");
        assert_eq!(&row[RAW_CHANNELS + 2], "-2");
        assert_eq!(&row[RAW_CHANNELS + 3], "frame_x.jpg");
    }

    #[test]
    fn missing_position_leaves_columns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.csv");
        let log = CsvAccumulator::open(&path).unwrap();
        let mut snap = snapshot(vec![0.0; RAW_CHANNELS]);
        snap.position = None;
        snap.frame_filename = None;
        log.append(&snap).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[RAW_CHANNELS + 1], "");
        assert_eq!(&row[RAW_CHANNELS + 3], "");
    }

    #[test]
    fn wrong_width_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.csv");
        let log = CsvAccumulator::open(&path).unwrap();
        let err = log.append(&snapshot(vec![1.0; 65])).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Sensor(SensorError::Length { got: 65, .. })
        ));
        assert_eq!(lines(&path).len(), 1);
    }
}

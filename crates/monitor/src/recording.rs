//! On-demand recording of the fused preview.
//!
//! At most one sink is open. Start, stop and frame appends all take the same
//! lock, so a frame can never be written to a sink that is being closed.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Local;
use image::{RgbImage, codecs::jpeg::JpegEncoder, imageops};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const RECORD_WIDTH: u32 = 640;
pub const RECORD_HEIGHT: u32 = 480;
pub const DEFAULT_RECORD_FPS: f64 = 12.0;
const FILE_STEM_FORMAT: &str = "recorded_video_%Y%m%d_%H%M%S_%3f";
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode recorded frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("recording lock poisoned")]
    Poisoned,
}

/// Destination for recorded frames.
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), RecordingError>;
    /// Flush and release the underlying resource.
    fn finish(self: Box<Self>) -> Result<(), RecordingError>;
    fn path(&self) -> &Path;
}

/// Opens sinks for new recording sessions.
pub trait SinkFactory: Send + Sync {
    fn open(
        &self,
        stem: &str,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn VideoSink>, RecordingError>;
}

/// Writes Motion-JPEG streams (concatenated JPEG images) into a directory.
#[derive(Debug, Clone)]
pub struct MjpegSinkFactory {
    dir: PathBuf,
    quality: u8,
}

impl MjpegSinkFactory {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality: quality.clamp(1, 100),
        }
    }

    /// Create `{stem}.mjpeg`, or `{stem}_N.mjpeg` when that name is taken.
    /// Existing recordings are never opened for writing.
    fn create_unique(&self, stem: &str) -> Result<(PathBuf, File), RecordingError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = match attempt {
                0 => format!("{stem}.mjpeg"),
                n => format!("{stem}_{n}.mjpeg"),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free recording name for {stem}"),
        )
        .into())
    }
}

impl SinkFactory for MjpegSinkFactory {
    fn open(
        &self,
        stem: &str,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn VideoSink>, RecordingError> {
        fs::create_dir_all(&self.dir)?;
        let (path, file) = self.create_unique(stem)?;
        debug!("opened {}x{} @ {fps} fps sink at {}", width, height, path.display());
        Ok(Box::new(MjpegFileSink {
            path,
            writer: BufWriter::new(file),
            quality: self.quality,
            frames: 0,
        }))
    }
}

pub struct MjpegFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    quality: u8,
    frames: u64,
}

impl VideoSink for MjpegFileSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), RecordingError> {
        JpegEncoder::new_with_quality(&mut self.writer, self.quality).encode_image(frame)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordingError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        info!("closed {} after {} frame(s)", self.path.display(), self.frames);
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordingStatus {
    Started { file: String },
    AlreadyRecording { file: String },
    Stopped { file: String },
    NotRecording,
}

impl RecordingStatus {
    pub fn message(&self) -> &'static str {
        match self {
            RecordingStatus::Started { .. } => "recording started",
            RecordingStatus::AlreadyRecording { .. } => "already recording",
            RecordingStatus::Stopped { .. } => "recording stopped",
            RecordingStatus::NotRecording => "not recording",
        }
    }
}

pub struct RecordingController {
    factory: Box<dyn SinkFactory>,
    fps: f64,
    session: Mutex<Option<Box<dyn VideoSink>>>,
}

impl RecordingController {
    pub fn new(factory: Box<dyn SinkFactory>, fps: f64) -> Self {
        Self {
            factory,
            fps,
            session: Mutex::new(None),
        }
    }

    /// Open a new timestamped sink. A no-op while a session is already active.
    pub fn start(&self) -> Result<RecordingStatus, RecordingError> {
        let mut session = self.session.lock().map_err(|_| RecordingError::Poisoned)?;
        if let Some(sink) = session.as_ref() {
            return Ok(RecordingStatus::AlreadyRecording {
                file: file_name(sink.path()),
            });
        }
        let stem = Local::now().format(FILE_STEM_FORMAT).to_string();
        let sink = self
            .factory
            .open(&stem, RECORD_WIDTH, RECORD_HEIGHT, self.fps)?;
        let file = file_name(sink.path());
        info!("recording started: {file}");
        *session = Some(sink);
        Ok(RecordingStatus::Started { file })
    }

    /// Flush and release the active sink. A no-op when idle.
    pub fn stop(&self) -> Result<RecordingStatus, RecordingError> {
        let mut session = self.session.lock().map_err(|_| RecordingError::Poisoned)?;
        let Some(sink) = session.take() else {
            return Ok(RecordingStatus::NotRecording);
        };
        let file = file_name(sink.path());
        sink.finish()?;
        info!("recording stopped: {file}");
        Ok(RecordingStatus::Stopped { file })
    }

    /// Scale `frame` to the recording resolution and append it when a session
    /// is active. Returns whether a frame was written.
    pub fn append(&self, frame: &RgbImage) -> Result<bool, RecordingError> {
        let mut session = self.session.lock().map_err(|_| RecordingError::Poisoned)?;
        let Some(sink) = session.as_mut() else {
            return Ok(false);
        };
        if frame.dimensions() == (RECORD_WIDTH, RECORD_HEIGHT) {
            sink.write_frame(frame)?;
        } else {
            let scaled = imageops::resize(
                frame,
                RECORD_WIDTH,
                RECORD_HEIGHT,
                imageops::FilterType::Triangle,
            );
            sink.write_frame(&scaled)?;
        }
        Ok(true)
    }

    pub fn is_recording(&self) -> bool {
        self.session
            .lock()
            .map(|session| session.is_some())
            .unwrap_or(false)
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if let Ok(session) = self.session.get_mut() {
            if let Some(sink) = session.take() {
                if let Err(err) = sink.finish() {
                    warn!("failed to close recording on shutdown: {err}");
                }
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

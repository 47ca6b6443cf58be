//! The assembled monitor: one owner for the bus, metrics, frame slot, sensor
//! path, recorder and frame processor.

use std::{
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Instant,
};

use ml_core::PoseModel;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use video_ingest::FrameSlot;

use crate::{
    error::MonitorError,
    events::{EventBus, EventSubscriber, MetricsSnapshot, MetricsStore, MonitorEvent},
    fusion::FusionEngine,
    pipeline::{
        MonitorConfig, ProcessingLoop,
        processor::{FramePacket, FrameProcessor, SharedPacket},
        runner::{self, latest_packet},
        stream_health::{StreamHealthMonitor, StreamState},
        vision_mode::{VisionMode, VisionModeStatus, VisionModeSwitch},
    },
    recording::{MjpegSinkFactory, RecordingController, RecordingStatus, SinkFactory},
    sensors::{CsvAccumulator, IngestReport, SensorClassifier, SensorIngest, SensorSnapshot},
};

const CLEAR_DOTS_MESSAGE: &str = "Clearing dots for the new day.";

/// Point-in-time view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub stream_state: Option<StreamState>,
    pub last_frame_time: Option<String>,
    pub frames_processed: u64,
    pub people_in_view: usize,
    pub person_fallen: bool,
    pub unique_fallers: u64,
    pub vision_mode: VisionMode,
    pub recording: bool,
    pub subscribers: usize,
}

pub struct Monitor {
    config: MonitorConfig,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsStore>,
    slot: Arc<FrameSlot>,
    ingest: SensorIngest,
    recorder: Arc<RecordingController>,
    processor: Arc<Mutex<FrameProcessor>>,
    vision: Arc<VisionModeSwitch>,
    latest: SharedPacket,
}

impl Monitor {
    /// Build a monitor recording MJPEG files under the configured data dir.
    pub fn new(config: MonitorConfig, model: Arc<dyn PoseModel>) -> Result<Self, MonitorError> {
        let factory = MjpegSinkFactory::new(config.recordings_dir(), config.jpeg_quality);
        Self::with_sink_factory(config, model, Box::new(factory))
    }

    pub fn with_sink_factory(
        config: MonitorConfig,
        model: Arc<dyn PoseModel>,
        sinks: Box<dyn SinkFactory>,
    ) -> Result<Self, MonitorError> {
        std::fs::create_dir_all(config.data_dir())?;
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(MetricsStore::load(bus.clone(), &config.metrics_path())?);
        let slot = Arc::new(FrameSlot::new());

        let csv = CsvAccumulator::open(config.csv_path())?;
        let ingest = SensorIngest::new(
            bus.clone(),
            metrics.clone(),
            csv,
            config.frames_dir(),
            slot.clone(),
        )
        .with_jpeg_quality(config.jpeg_quality);

        let recorder = Arc::new(RecordingController::new(sinks, config.record_fps));
        let vision = Arc::new(VisionModeSwitch::new());
        let processor = FrameProcessor::new(
            slot.clone(),
            StreamHealthMonitor::new(config.health, metrics.clone()),
            FusionEngine::new(model, metrics.clone(), config.fusion),
            metrics.clone(),
            recorder.clone(),
        )
        .with_jpeg_quality(config.jpeg_quality)
        .with_placeholder_size(config.capture_width, config.capture_height)
        .with_vision_switch(vision.clone());

        info!(
            data_dir = %config.data_dir().display(),
            "monitor ready"
        );
        Ok(Self {
            config,
            bus,
            metrics,
            slot,
            ingest,
            recorder,
            processor: Arc::new(Mutex::new(processor)),
            vision,
            latest: Arc::new(Mutex::new(None)),
        })
    }

    /// Replace the map-dot classifier. Only valid before the monitor is shared.
    pub fn with_classifier(mut self, classifier: Box<dyn SensorClassifier>) -> Self {
        self.ingest = self.ingest.with_classifier(classifier);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Slot the ingestion context writes frames into.
    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn subscribe_events(&self) -> EventSubscriber {
        self.bus.subscribe()
    }

    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> Arc<MetricsStore> {
        self.metrics.clone()
    }

    /// Run one processing step on the calling thread and return the JPEG the
    /// preview should show.
    pub fn process_frame(&self) -> Result<Arc<[u8]>, MonitorError> {
        let packet = {
            let mut processor = self
                .processor
                .lock()
                .map_err(|_| io::Error::other("frame processor lock poisoned"))?;
            processor.process_frame(Instant::now())
        };
        let jpeg = packet.jpeg.clone();
        runner::publish(&self.latest, packet);
        Ok(jpeg)
    }

    /// Start the background processing thread at the configured cadence.
    pub fn start_processing(&self) -> io::Result<ProcessingLoop> {
        ProcessingLoop::spawn(
            self.processor.clone(),
            self.config.poll_interval,
            self.latest.clone(),
            self.recorder.clone(),
        )
    }

    /// Most recent preview produced by either path.
    pub fn latest_frame(&self) -> Option<FramePacket> {
        latest_packet(&self.latest)
    }

    pub fn ingest_sensor_message(&self, message: &Value) -> Result<IngestReport, MonitorError> {
        self.ingest.ingest_message(message)
    }

    pub fn ingest_sensor_str(&self, message: &str) -> Result<IngestReport, MonitorError> {
        self.ingest.ingest_str(message)
    }

    pub fn latest_sensor(&self) -> Option<Arc<SensorSnapshot>> {
        self.ingest.latest()
    }

    pub fn start_recording(&self) -> Result<RecordingStatus, MonitorError> {
        Ok(self.recorder.start()?)
    }

    pub fn stop_recording(&self) -> Result<RecordingStatus, MonitorError> {
        Ok(self.recorder.stop()?)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Switch the preview mode. Show modes revert to the grid on their own.
    pub fn set_vision_mode(&self, mode: VisionMode) -> VisionModeStatus {
        self.vision.set(mode, Instant::now())
    }

    pub fn vision_mode(&self) -> VisionModeStatus {
        self.vision.status(Instant::now())
    }

    /// Tell every subscriber to wipe its map overlay.
    pub fn clear_map_dots(&self) {
        let delivered = self.bus.publish(MonitorEvent::ClearMapDots {
            message: CLEAR_DOTS_MESSAGE.to_string(),
        });
        debug!(delivered, "clear_map_dots broadcast");
    }

    /// Write the metrics snapshot to the side file and return its path.
    pub fn persist_metrics(&self) -> Result<PathBuf, MonitorError> {
        let path = self.config.metrics_path();
        self.metrics.persist(&path)?;
        Ok(path)
    }

    pub fn status(&self) -> MonitorStatus {
        let summary = match self.processor.lock() {
            Ok(processor) => processor.summary().clone(),
            Err(_) => Default::default(),
        };
        let frames_processed = self
            .metrics
            .get(crate::events::metrics::FRAMES_PROCESSED)
            .map(|v| v.as_f64() as u64)
            .unwrap_or(0);
        MonitorStatus {
            stream_state: summary.stream_state,
            last_frame_time: summary.last_frame_time,
            frames_processed,
            people_in_view: summary.people_in_view,
            person_fallen: summary.person_fallen,
            unique_fallers: summary.unique_fallers,
            vision_mode: self.vision.current(Instant::now()),
            recording: self.recorder.is_recording(),
            subscribers: self.bus.subscriber_count(),
        }
    }
}

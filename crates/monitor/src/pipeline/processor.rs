//! One iteration of the processing loop: health check, inference, rendering.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, warn};
use video_ingest::FrameSlot;

use crate::{
    events::{MetricsStore, metrics::FRAMES_PROCESSED},
    fusion::FusionEngine,
    pipeline::{
        compose::{draw_glasses, encode_jpeg, fit_frame, half_size, offline_placeholder, render_grid},
        stream_health::{StreamHealthMonitor, StreamPoll, StreamState},
        vision_mode::{VisionMode, VisionModeSwitch},
    },
    recording::{RECORD_HEIGHT, RECORD_WIDTH, RecordingController},
};

/// Encoded preview plus what the loop knew when it produced it.
#[derive(Clone, Debug)]
pub struct FramePacket {
    pub jpeg: Arc<[u8]>,
    pub summary: FrameSummary,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameSummary {
    /// Frames that went through inference so far.
    pub frame_number: u64,
    pub stream_state: Option<StreamState>,
    pub last_frame_time: Option<String>,
    pub people_in_view: usize,
    pub person_fallen: bool,
    pub unique_fallers: u64,
    pub vision_mode: VisionMode,
}

pub type SharedPacket = Arc<Mutex<Option<FramePacket>>>;

pub struct FrameProcessor {
    slot: Arc<FrameSlot>,
    health: StreamHealthMonitor,
    fusion: FusionEngine,
    metrics: Arc<MetricsStore>,
    recorder: Arc<RecordingController>,
    vision: Arc<VisionModeSwitch>,
    jpeg_quality: u8,
    placeholder_size: (u32, u32),
    last_rendered: Option<Arc<[u8]>>,
    placeholder: Option<(Option<String>, Arc<[u8]>)>,
    summary: FrameSummary,
}

impl FrameProcessor {
    pub fn new(
        slot: Arc<FrameSlot>,
        health: StreamHealthMonitor,
        fusion: FusionEngine,
        metrics: Arc<MetricsStore>,
        recorder: Arc<RecordingController>,
    ) -> Self {
        Self {
            slot,
            health,
            fusion,
            metrics,
            recorder,
            vision: Arc::new(VisionModeSwitch::new()),
            jpeg_quality: 85,
            placeholder_size: (640, 480),
            last_rendered: None,
            placeholder: None,
            summary: FrameSummary::default(),
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Share the operator's mode switch with the caller.
    pub fn with_vision_switch(mut self, vision: Arc<VisionModeSwitch>) -> Self {
        self.vision = vision;
        self
    }

    /// Size of the offline placeholder; matches the composed grid by default.
    pub fn with_placeholder_size(mut self, width: u32, height: u32) -> Self {
        self.placeholder_size = (width.max(1), height.max(1));
        self
    }

    /// Poll the slot once and produce the image the preview should show now.
    ///
    /// Only a new LIVE frame is run through the model. A frozen stream keeps
    /// showing the last rendered image and an offline one shows the placeholder.
    /// Fullscreen and glasses modes replace the grid while they last and skip
    /// the fall heuristics.
    pub fn process_frame(&mut self, now: Instant) -> FramePacket {
        let frame = self.slot.latest();
        let poll = self.health.poll(frame.as_ref().map(|f| f.pts), now);
        ::metrics::gauge!("robowatch_stream_state").set(poll.state.gauge_value());

        self.summary.stream_state = Some(poll.state);
        self.summary.last_frame_time = poll.last_frame_time.clone();

        let jpeg = match (poll.state, frame) {
            (StreamState::Live, Some(frame)) if poll.new_frame => {
                match self.render_live(&frame, now) {
                    Some(jpeg) => jpeg,
                    None => self.fallback(&poll),
                }
            }
            (StreamState::Offline, _) => self.placeholder_jpeg(&poll),
            _ => self.fallback(&poll),
        };

        FramePacket {
            jpeg,
            summary: self.summary.clone(),
        }
    }

    pub fn summary(&self) -> &FrameSummary {
        &self.summary
    }

    fn render_live(&mut self, frame: &video_ingest::Frame, now: Instant) -> Option<Arc<[u8]>> {
        let decoded = match frame.decode() {
            Ok(image) => image,
            Err(err) => {
                warn!(pts = frame.pts, "dropping undecodable frame: {err}");
                return None;
            }
        };
        let mode = self.vision.current(now);
        self.summary.vision_mode = mode;
        let grid = match mode {
            VisionMode::Grid => self.render_fused(&decoded, frame.pts, now),
            VisionMode::Fullscreen => fit_frame(&decoded, RECORD_WIDTH, RECORD_HEIGHT),
            VisionMode::Glasses => {
                let mut shown = fit_frame(&decoded, RECORD_WIDTH, RECORD_HEIGHT);
                match self.fusion.model().detect(&shown) {
                    Ok(people) => draw_glasses(&mut shown, &people),
                    Err(err) => warn!("pose model failed in glasses mode: {err}"),
                }
                shown
            }
        };

        match self.recorder.append(&grid) {
            Ok(true) => debug!("recorded frame {}", self.summary.frame_number),
            Ok(false) => {}
            Err(err) => warn!("failed to record frame: {err}"),
        }

        match encode_jpeg(&grid, self.jpeg_quality) {
            Ok(bytes) => {
                let jpeg: Arc<[u8]> = bytes.into();
                self.last_rendered = Some(jpeg.clone());
                Some(jpeg)
            }
            Err(err) => {
                warn!("failed to encode preview: {err}");
                None
            }
        }
    }

    fn render_fused(&mut self, decoded: &RgbImage, pts: i64, now: Instant) -> RgbImage {
        let view = half_size(decoded);
        let report = {
            let _span = tracing::info_span!("fusion", pts).entered();
            self.fusion.process(&view, now)
        };
        let grid = render_grid(&view, &report);

        self.metrics.increment(FRAMES_PROCESSED);
        self.summary.frame_number = self.summary.frame_number.wrapping_add(1);
        self.summary.people_in_view = report.boxes.person_count;
        self.summary.person_fallen = report.combined_fallen;
        self.summary.unique_fallers = report.unique_fallers;
        grid
    }

    fn fallback(&mut self, poll: &StreamPoll) -> Arc<[u8]> {
        match &self.last_rendered {
            Some(jpeg) => jpeg.clone(),
            None => self.placeholder_jpeg(poll),
        }
    }

    /// The placeholder only changes with the last-frame time, so it is cached.
    fn placeholder_jpeg(&mut self, poll: &StreamPoll) -> Arc<[u8]> {
        if let Some((time, jpeg)) = &self.placeholder {
            if *time == poll.last_frame_time {
                return jpeg.clone();
            }
        }
        let (width, height) = self.placeholder_size;
        let image = offline_placeholder(width, height, poll.last_frame_time.as_deref());
        let jpeg: Arc<[u8]> = match encode_jpeg(&image, self.jpeg_quality) {
            Ok(bytes) => bytes.into(),
            Err(err) => {
                warn!("failed to encode offline placeholder: {err}");
                Arc::from(Vec::new())
            }
        };
        self.placeholder = Some((poll.last_frame_time.clone(), jpeg.clone()));
        jpeg
    }
}

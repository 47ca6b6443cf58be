use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use image::RgbImage;
use ml_core::{PersonDetection, PoseModel};
use tracing::{debug, warn};

use crate::{
    events::{
        MetricsStore,
        metrics::{FALL_ALARMS, PEOPLE_DETECTED},
    },
    fusion::{
        debounce::{Debouncer, PersonCounter},
        heuristics::{BoxAnalysis, Heuristic, analyze_boxes, bottom_fallen, pose_fallen},
        tracker::{FallTracker, TrackerConfig},
    },
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    pub fall_cooldown: Duration,
    pub person_cooldown: Duration,
    pub tracker: TrackerConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            fall_cooldown: Duration::from_millis(500),
            person_cooldown: Duration::from_millis(500),
            tracker: TrackerConfig::default(),
        }
    }
}

/// Model output for each algorithmic view. A view whose model call failed
/// holds no detections.
#[derive(Debug, Clone, Default)]
pub struct ViewDetections {
    pub boxes: Vec<PersonDetection>,
    pub pose: Vec<PersonDetection>,
    pub bottom: Vec<PersonDetection>,
}

/// Everything the fusion layer derived from one processed frame.
#[derive(Debug, Clone, Default)]
pub struct FusionReport {
    pub boxes: BoxAnalysis,
    pub pose_fallen: bool,
    pub bottom_fallen: bool,
    pub combined_fallen: bool,
    /// Heuristics whose counter was bumped on this frame.
    pub counted: Vec<Heuristic>,
    /// All three heuristics newly agreed on a fall.
    pub severe_alarm: bool,
    /// Tracker episodes that raised an alarm on this frame.
    pub new_alarms: Vec<u64>,
    pub unique_fallers: u64,
    pub views: ViewDetections,
}

impl FusionReport {
    pub fn fallen(&self, heuristic: Heuristic) -> bool {
        match heuristic {
            Heuristic::BoxAspect => self.boxes.fallen,
            Heuristic::PoseGeometry => self.pose_fallen,
            Heuristic::BottomFraction => self.bottom_fallen,
            Heuristic::Combined => self.combined_fallen,
        }
    }
}

pub struct FusionEngine {
    model: Arc<dyn PoseModel>,
    metrics: Arc<MetricsStore>,
    debouncers: [Debouncer; 4],
    people: PersonCounter,
    tracker: FallTracker,
}

impl FusionEngine {
    pub fn new(model: Arc<dyn PoseModel>, metrics: Arc<MetricsStore>, config: FusionConfig) -> Self {
        Self {
            model,
            metrics,
            debouncers: Heuristic::ALL.map(|h| Debouncer::new(h.policy(), config.fall_cooldown)),
            people: PersonCounter::new(config.person_cooldown),
            tracker: FallTracker::new(config.tracker),
        }
    }

    /// Run every heuristic on `image` and push the resulting counts into the
    /// metrics store.
    pub fn process(&mut self, image: &RgbImage, now: Instant) -> FusionReport {
        let views = ViewDetections {
            boxes: self.detect(image, Heuristic::BoxAspect),
            pose: self.detect(image, Heuristic::PoseGeometry),
            bottom: self.detect(image, Heuristic::BottomFraction),
        };

        let boxes = analyze_boxes(&views.boxes);
        let pose = pose_fallen(&views.pose);
        let bottom = bottom_fallen(&views.bottom, image.height());
        let mut report = FusionReport {
            combined_fallen: boxes.fallen && pose && bottom,
            pose_fallen: pose,
            bottom_fallen: bottom,
            boxes,
            ..Default::default()
        };

        if self.people.observe(report.boxes.person_count, now) {
            self.metrics.increment(PEOPLE_DETECTED);
        }

        for heuristic in Heuristic::ALL {
            let fallen = report.fallen(heuristic);
            if self.debouncers[heuristic.index()].observe(fallen, now) {
                self.metrics.increment(heuristic.metric());
                report.counted.push(heuristic);
                debug!(heuristic = heuristic.label(), "fall counted");
            }
        }
        report.severe_alarm = report.counted.contains(&Heuristic::Combined);
        if report.severe_alarm {
            warn!("all fall heuristics agree: person is down");
        }

        report.new_alarms = self.tracker.update(&report.boxes.people, now);
        self.metrics
            .increment_by(FALL_ALARMS, report.new_alarms.len() as u64);
        report.unique_fallers = self.tracker.unique_faller_count();
        report.views = views;
        report
    }

    pub fn model(&self) -> &Arc<dyn PoseModel> {
        &self.model
    }

    pub fn tracker(&self) -> &FallTracker {
        &self.tracker
    }

    fn detect(&self, image: &RgbImage, view: Heuristic) -> Vec<PersonDetection> {
        match self.model.detect(image) {
            Ok(people) => people,
            Err(err) => {
                warn!(view = view.label(), "pose model failed: {err}");
                Vec::new()
            }
        }
    }
}

//! Liveness of the incoming video stream, judged from frame identities.
//!
//! The processing loop polls far more often than a camera delivers frames, so
//! a repeated identity on its own only means "no new frame yet" (FROZEN). The
//! stream is declared OFFLINE once the repetition outlasts either the
//! duplicate budget or the freeze timeout.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::events::MetricsStore;

pub const DEFAULT_DUPLICATE_THRESHOLD: u32 = 5;
pub const DEFAULT_FREEZE_THRESHOLD: Duration = Duration::from_secs(5);
const FRAME_TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Live,
    Frozen,
    Offline,
}

impl StreamState {
    pub fn label(self) -> &'static str {
        match self {
            StreamState::Live => "live",
            StreamState::Frozen => "frozen",
            StreamState::Offline => "offline",
        }
    }

    /// Numeric encoding for the state gauge.
    pub fn gauge_value(self) -> f64 {
        match self {
            StreamState::Live => 0.0,
            StreamState::Frozen => 1.0,
            StreamState::Offline => 2.0,
        }
    }

    fn seconds_metric(self) -> String {
        format!("stream_{}_seconds", self.label())
    }

    fn entered_metric(self) -> Option<String> {
        match self {
            StreamState::Live => None,
            _ => Some(format!("stream_{}_count", self.label())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthConfig {
    pub duplicate_threshold: u32,
    pub freeze_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            freeze_threshold: DEFAULT_FREEZE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamPoll {
    pub state: StreamState,
    /// The polled identity differs from the previous one.
    pub new_frame: bool,
    /// Wall-clock time the last distinct frame was seen, `HH:MM:SS`.
    pub last_frame_time: Option<String>,
}

pub struct StreamHealthMonitor {
    config: HealthConfig,
    metrics: Arc<MetricsStore>,
    last_identity: Option<i64>,
    duplicate_count: u32,
    freeze_started: Option<Instant>,
    state: Option<StreamState>,
    dwell_since: Instant,
    last_frame_time: Option<String>,
}

impl StreamHealthMonitor {
    pub fn new(config: HealthConfig, metrics: Arc<MetricsStore>) -> Self {
        Self {
            config,
            metrics,
            last_identity: None,
            duplicate_count: 0,
            freeze_started: None,
            state: None,
            dwell_since: Instant::now(),
            last_frame_time: None,
        }
    }

    /// Classify one poll. `identity` is the presentation timestamp of the
    /// frame currently in the slot, or `None` when the slot is empty.
    pub fn poll(&mut self, identity: Option<i64>, now: Instant) -> StreamPoll {
        let (state, new_frame) = match identity {
            None => {
                self.duplicate_count = 0;
                self.freeze_started = None;
                (StreamState::Offline, false)
            }
            Some(id) if self.last_identity != Some(id) => {
                self.last_identity = Some(id);
                self.duplicate_count = 0;
                self.freeze_started = None;
                self.last_frame_time = Some(Local::now().format(FRAME_TIME_FORMAT).to_string());
                (StreamState::Live, true)
            }
            Some(_) => {
                self.duplicate_count = self.duplicate_count.saturating_add(1);
                let since = *self.freeze_started.get_or_insert(now);
                let stalled = self.duplicate_count > self.config.duplicate_threshold
                    || now.saturating_duration_since(since) > self.config.freeze_threshold;
                if stalled {
                    (StreamState::Offline, false)
                } else {
                    (StreamState::Frozen, false)
                }
            }
        };

        self.account(state, now);
        StreamPoll {
            state,
            new_frame,
            last_frame_time: self.last_frame_time.clone(),
        }
    }

    pub fn state(&self) -> Option<StreamState> {
        self.state
    }

    pub fn duplicate_count(&self) -> u32 {
        self.duplicate_count
    }

    pub fn last_frame_time(&self) -> Option<&str> {
        self.last_frame_time.as_deref()
    }

    /// Dwell time is flushed in whole seconds: everything on a transition, and
    /// once per elapsed second while the state holds. Sub-second remainders
    /// carry over within a state and are dropped on a transition.
    fn account(&mut self, state: StreamState, now: Instant) {
        match self.state {
            Some(previous) if previous == state => {
                let whole = now.saturating_duration_since(self.dwell_since).as_secs();
                if whole >= 1 {
                    self.metrics
                        .add_seconds(&previous.seconds_metric(), whole as f64);
                    self.dwell_since += Duration::from_secs(whole);
                }
            }
            previous => {
                if let Some(previous) = previous {
                    let whole = now.saturating_duration_since(self.dwell_since).as_secs();
                    self.metrics
                        .add_seconds(&previous.seconds_metric(), whole as f64);
                    match state {
                        StreamState::Live => info!("stream is live again"),
                        StreamState::Frozen => info!("stream frozen"),
                        StreamState::Offline => warn!(
                            duplicates = self.duplicate_count,
                            "stream offline"
                        ),
                    }
                }
                if let Some(name) = state.entered_metric() {
                    self.metrics.increment(&name);
                }
                self.state = Some(state);
                self.dwell_since = now;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, MetricValue};

    fn monitor() -> (StreamHealthMonitor, Arc<MetricsStore>) {
        let metrics = Arc::new(MetricsStore::new(Arc::new(EventBus::new())));
        (
            StreamHealthMonitor::new(HealthConfig::default(), metrics.clone()),
            metrics,
        )
    }

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    fn value(metrics: &MetricsStore, name: &str) -> f64 {
        metrics.get(name).map(|v| v.as_f64()).unwrap_or(-1.0)
    }

    #[test]
    fn new_identities_are_live() {
        let (mut health, _) = monitor();
        let t0 = Instant::now();
        let poll = health.poll(Some(1), t0);
        assert_eq!(poll.state, StreamState::Live);
        assert!(poll.new_frame);
        assert!(poll.last_frame_time.is_some());
        assert!(health.poll(Some(2), at(t0, 20)).new_frame);
    }

    #[test]
    fn duplicates_freeze_then_go_offline_past_the_count() {
        let (mut health, metrics) = monitor();
        let t0 = Instant::now();
        health.poll(Some(7), t0);
        let states: Vec<StreamState> = (1..=7)
            .map(|i| health.poll(Some(7), at(t0, i * 20)).state)
            .collect();
        use StreamState::*;
        assert_eq!(states, vec![Frozen, Frozen, Frozen, Frozen, Frozen, Offline, Offline]);
        assert_eq!(value(&metrics, "stream_frozen_count"), 1.0);
        assert_eq!(value(&metrics, "stream_offline_count"), 1.0);
    }

    #[test]
    fn long_freezes_go_offline_past_the_timeout() {
        let metrics = Arc::new(MetricsStore::new(Arc::new(EventBus::new())));
        let config = HealthConfig {
            duplicate_threshold: 1_000,
            freeze_threshold: Duration::from_secs(5),
        };
        let mut health = StreamHealthMonitor::new(config, metrics);
        let t0 = Instant::now();
        health.poll(Some(1), t0);
        assert_eq!(health.poll(Some(1), at(t0, 100)).state, StreamState::Frozen);
        assert_eq!(health.poll(Some(1), at(t0, 5100)).state, StreamState::Frozen);
        assert_eq!(health.poll(Some(1), at(t0, 5101)).state, StreamState::Offline);
    }

    #[test]
    fn one_new_identity_recovers_from_offline() {
        let (mut health, _) = monitor();
        let t0 = Instant::now();
        health.poll(Some(1), t0);
        for i in 1..=10 {
            health.poll(Some(1), at(t0, i * 20));
        }
        assert_eq!(health.state(), Some(StreamState::Offline));
        let poll = health.poll(Some(2), at(t0, 300));
        assert_eq!(poll.state, StreamState::Live);
        assert_eq!(health.duplicate_count(), 0);
    }

    #[test]
    fn empty_slot_is_offline() {
        let (mut health, metrics) = monitor();
        let poll = health.poll(None, Instant::now());
        assert_eq!(poll.state, StreamState::Offline);
        assert!(poll.last_frame_time.is_none());
        assert_eq!(value(&metrics, "stream_offline_count"), 1.0);
    }

    #[test]
    fn dwell_is_flushed_in_whole_seconds() {
        let (mut health, metrics) = monitor();
        let t0 = Instant::now();
        for i in 0..=125u64 {
            health.poll(Some(i as i64), at(t0, i * 20));
        }
        // 2.5s live: two whole seconds flushed, remainder pending
        assert_eq!(value(&metrics, "stream_live_seconds"), 2.0);

        for i in 1..=3u64 {
            health.poll(Some(125), at(t0, 2500 + i * 20));
        }
        // transition flushes the pending half second as zero whole seconds
        assert_eq!(value(&metrics, "stream_live_seconds"), 2.0);
        assert_eq!(health.state(), Some(StreamState::Frozen));
        assert_eq!(
            metrics.get("stream_frozen_seconds"),
            Some(MetricValue::Seconds(0.0))
        );
    }

    #[test]
    fn every_poll_yields_a_state() {
        let (mut health, _) = monitor();
        let t0 = Instant::now();
        let identities = [None, Some(1), Some(1), None, Some(1), Some(2)];
        for (i, id) in identities.into_iter().enumerate() {
            let poll = health.poll(id, at(t0, i as u64 * 20));
            assert_eq!(health.state(), Some(poll.state));
        }
    }
}

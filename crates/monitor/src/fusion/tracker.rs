//! Associates per-frame box centroids into per-person fall episodes.
//!
//! A person has to stay fallen for `persistence` before the episode counts as
//! an alarm. After that the episode is disarmed until the person is seen
//! upright again and `cooldown` has passed since the alarm.

use std::time::{Duration, Instant};

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Centroid {
    pub x: f32,
    pub y: f32,
}

impl Centroid {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Centroid) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Farthest a centroid may move between frames and keep its episode.
    pub match_distance: f32,
    /// Episodes not observed for longer than this are dropped.
    pub expiry: Duration,
    pub persistence: Duration,
    pub cooldown: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_distance: 80.0,
            expiry: Duration::from_secs(2),
            persistence: Duration::from_secs(1),
            cooldown: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallEpisode {
    pub id: u64,
    pub centroid: Centroid,
    pub fallen: bool,
    pub first_seen_fallen: Option<Instant>,
    pub last_seen_fallen: Option<Instant>,
    pub last_seen: Instant,
    /// Set when the current fall has been counted; cleared once seen upright.
    pub triggered: bool,
    /// Set once the episode has raised any alarm.
    pub counted: bool,
    last_triggered: Option<Instant>,
}

impl FallEpisode {
    fn new(id: u64, centroid: Centroid, now: Instant) -> Self {
        Self {
            id,
            centroid,
            fallen: false,
            first_seen_fallen: None,
            last_seen_fallen: None,
            last_seen: now,
            triggered: false,
            counted: false,
            last_triggered: None,
        }
    }

    fn observe(&mut self, centroid: Centroid, fallen: bool, now: Instant, cfg: &TrackerConfig) -> bool {
        self.centroid = centroid;
        self.last_seen = now;
        if !fallen {
            self.fallen = false;
            self.first_seen_fallen = None;
            self.triggered = false;
            return false;
        }

        let since = *self.first_seen_fallen.get_or_insert(now);
        self.fallen = true;
        self.last_seen_fallen = Some(now);

        let persisted = now.saturating_duration_since(since) >= cfg.persistence;
        let cooled = self
            .last_triggered
            .is_none_or(|t| now.saturating_duration_since(t) > cfg.cooldown);
        if !self.triggered && persisted && cooled {
            self.triggered = true;
            self.last_triggered = Some(now);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallTracker {
    config: TrackerConfig,
    episodes: Vec<FallEpisode>,
    next_id: u64,
    unique_fallers: u64,
}

impl FallTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            episodes: Vec::new(),
            next_id: 1,
            unique_fallers: 0,
        }
    }

    /// Feed one frame of `(centroid, fallen)` observations and return the
    /// ids of episodes that raised an alarm on this frame.
    pub fn update(&mut self, detections: &[(Centroid, bool)], now: Instant) -> Vec<u64> {
        let expiry = self.config.expiry;
        self.episodes.retain(|ep| {
            let keep = now.saturating_duration_since(ep.last_seen) <= expiry;
            if !keep {
                debug!(id = ep.id, "fall episode expired");
            }
            keep
        });

        let assignment = self.associate(detections);
        let mut triggered = Vec::new();
        for (det_idx, (centroid, fallen)) in detections.iter().enumerate() {
            let ep_idx = match assignment[det_idx] {
                Some(idx) => idx,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.episodes.push(FallEpisode::new(id, *centroid, now));
                    self.episodes.len() - 1
                }
            };
            let episode = &mut self.episodes[ep_idx];
            if episode.observe(*centroid, *fallen, now, &self.config) {
                info!(id = episode.id, "fall confirmed");
                triggered.push(episode.id);
                if !episode.counted {
                    episode.counted = true;
                    self.unique_fallers += 1;
                }
            }
        }
        triggered
    }

    /// Number of distinct episodes that have ever raised an alarm.
    pub fn unique_faller_count(&self) -> u64 {
        self.unique_fallers
    }

    pub fn episodes(&self) -> &[FallEpisode] {
        &self.episodes
    }

    /// Greedy one-to-one matching on ascending distance, limited to
    /// `match_distance`. Returns the matched episode index per detection.
    fn associate(&self, detections: &[(Centroid, bool)]) -> Vec<Option<usize>> {
        let mut pairs: Vec<(f32, usize, usize)> = detections
            .iter()
            .enumerate()
            .flat_map(|(d, (centroid, _))| {
                self.episodes
                    .iter()
                    .enumerate()
                    .map(move |(e, ep)| (ep.centroid.distance(centroid), d, e))
            })
            .filter(|(dist, _, _)| *dist <= self.config.match_distance)
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut by_detection = vec![None; detections.len()];
        let mut taken = vec![false; self.episodes.len()];
        for (_, d, e) in pairs {
            if by_detection[d].is_none() && !taken[e] {
                by_detection[d] = Some(e);
                taken[e] = true;
            }
        }
        by_detection
    }
}

impl Default for FallTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

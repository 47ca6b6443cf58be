//! Fall detection fusion: per-frame heuristics, cross-frame debouncing and
//! per-person episode tracking.

pub mod debounce;
pub mod engine;
pub mod heuristics;
pub mod tracker;

pub use debounce::{Debouncer, PersonCounter, TriggerPolicy};
pub use engine::{FusionConfig, FusionEngine, FusionReport, ViewDetections};
pub use heuristics::{BoxAnalysis, Heuristic};
pub use tracker::{Centroid, FallEpisode, FallTracker, TrackerConfig};

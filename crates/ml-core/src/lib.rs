//! Interface to the external pose/person detection model.
//!
//! The monitor never runs inference itself; it calls a [`PoseModel`] per view
//! and consumes bounding boxes and skeleton keypoints.

pub mod detector;
pub mod http;
pub mod keypoint;

pub use detector::{ModelError, NullPoseModel, PersonDetection, PoseModel};
pub use http::HttpPoseModel;
pub use keypoint::{Keypoint, KeypointIndex};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

use crate::keypoint::{Keypoint, KeypointIndex};

/// One person reported by the pose model.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PersonDetection {
    /// `[x1, y1, x2, y2]` in pixels, when the model produced a box.
    #[serde(default)]
    pub bbox: Option<[f32; 4]>,
    /// Up to 17 keypoints in COCO order; missing joints are `(0, 0)`.
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
    #[serde(default)]
    pub score: f32,
}

impl PersonDetection {
    pub fn keypoint(&self, index: KeypointIndex) -> Option<Keypoint> {
        self.keypoints.get(index as usize).copied()
    }

    pub fn has_full_skeleton(&self) -> bool {
        self.keypoints.len() >= KeypointIndex::COUNT
    }

    pub fn detected_keypoints(&self) -> impl Iterator<Item = &Keypoint> {
        self.keypoints.iter().filter(|kp| kp.is_detected())
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("pose model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("pose model returned malformed output: {0}")]
    Malformed(String),
    #[error("failed to encode frame for the pose model: {0}")]
    Encode(#[from] image::ImageError),
}

/// Person/pose detector consumed by the fusion engine.
///
/// Implementations must be callable from the processing thread; a failure is
/// scoped to the single call that produced it.
pub trait PoseModel: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<PersonDetection>, ModelError>;
}

/// Model stand-in that never sees anybody.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPoseModel;

impl PoseModel for NullPoseModel {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<PersonDetection>, ModelError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detections_deserialize_with_optional_fields() {
        let json = r#"[
            {"bbox": [1, 2, 30, 10], "score": 0.9},
            {"keypoints": [[1, 2], [0, 0]]}
        ]"#;
        let people: Vec<PersonDetection> = serde_json::from_str(json).unwrap();
        assert_eq!(people[0].bbox, Some([1.0, 2.0, 30.0, 10.0]));
        assert!(people[0].keypoints.is_empty());
        assert_eq!(people[1].bbox, None);
        assert_eq!(people[1].detected_keypoints().count(), 1);
        assert!(!people[1].has_full_skeleton());
    }

    #[test]
    fn null_model_sees_nobody() {
        let image = RgbImage::new(4, 4);
        assert!(NullPoseModel.detect(&image).unwrap().is_empty());
    }
}

use serde::Deserialize;

/// COCO body keypoint order used by pose models (17 points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;
}

/// Pixel-space keypoint. The model reports `(0, 0)` for joints it could not see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(from = "[f32; 2]")]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_detected(&self) -> bool {
        self.x != 0.0 || self.y != 0.0
    }

    pub fn midpoint(&self, other: &Keypoint) -> Keypoint {
        Keypoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn distance(&self, other: &Keypoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<[f32; 2]> for Keypoint {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_means_missing() {
        assert!(!Keypoint::default().is_detected());
        assert!(Keypoint::new(0.0, 3.0).is_detected());
    }

    #[test]
    fn geometry_helpers() {
        let a = Keypoint::new(0.0, 0.0);
        let b = Keypoint::new(6.0, 8.0);
        assert_eq!(a.distance(&b), 10.0);
        assert_eq!(a.midpoint(&b), Keypoint::new(3.0, 4.0));
    }
}

//! Per-frame fall heuristics over pose model output.
//!
//! Each function looks at one frame's detections only; debouncing across
//! frames lives in [`crate::fusion::debounce`].

use ml_core::{KeypointIndex, PersonDetection};

use crate::{
    events::metrics::{FALLS_BOX, FALLS_BOTTOM, FALLS_FULL, FALLS_POSE},
    fusion::{debounce::TriggerPolicy, tracker::Centroid},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Heuristic {
    BoxAspect,
    PoseGeometry,
    BottomFraction,
    Combined,
}

impl Heuristic {
    pub const ALL: [Heuristic; 4] = [
        Heuristic::BoxAspect,
        Heuristic::PoseGeometry,
        Heuristic::BottomFraction,
        Heuristic::Combined,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Heuristic::BoxAspect => "box",
            Heuristic::PoseGeometry => "pose",
            Heuristic::BottomFraction => "bottom",
            Heuristic::Combined => "full",
        }
    }

    /// Counter bumped when this heuristic reports a fall.
    pub fn metric(self) -> &'static str {
        match self {
            Heuristic::BoxAspect => FALLS_BOX,
            Heuristic::PoseGeometry => FALLS_POSE,
            Heuristic::BottomFraction => FALLS_BOTTOM,
            Heuristic::Combined => FALLS_FULL,
        }
    }

    /// Box is counted on every fallen frame once its cooldown has passed; the
    /// others only on a not-fallen to fallen transition.
    pub fn policy(self) -> TriggerPolicy {
        match self {
            Heuristic::BoxAspect => TriggerPolicy::Level,
            _ => TriggerPolicy::Edge,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Result of the box-aspect heuristic for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoxAnalysis {
    pub fallen: bool,
    pub person_count: usize,
    /// One entry per boxed person, fed to the identity tracker.
    pub people: Vec<(Centroid, bool)>,
}

/// A box wider than it is tall is a person lying down.
pub fn analyze_boxes(detections: &[PersonDetection]) -> BoxAnalysis {
    let people: Vec<(Centroid, bool)> = detections
        .iter()
        .filter_map(|person| person.bbox)
        .map(|[x1, y1, x2, y2]| {
            let (w, h) = (x2 - x1, y2 - y1);
            let centroid = Centroid::new((x1 + x2) / 2.0, (y1 + y2) / 2.0);
            (centroid, h < w)
        })
        .collect();
    BoxAnalysis {
        fallen: people.iter().any(|(_, fallen)| *fallen),
        person_count: people.len(),
        people,
    }
}

const POSE_REQUIRED: [KeypointIndex; 6] = [
    KeypointIndex::LeftShoulder,
    KeypointIndex::RightShoulder,
    KeypointIndex::LeftHip,
    KeypointIndex::RightHip,
    KeypointIndex::LeftAnkle,
    KeypointIndex::RightAnkle,
];

/// Fallen when, on either side, the shoulder sits vertically closer to the
/// ankle than the shoulder midpoint is to the hip midpoint.
pub fn pose_fallen(detections: &[PersonDetection]) -> bool {
    detections.iter().any(person_pose_fallen)
}

fn person_pose_fallen(person: &PersonDetection) -> bool {
    if !person.has_full_skeleton() {
        return false;
    }
    let mut points = [ml_core::Keypoint::default(); 6];
    for (slot, index) in points.iter_mut().zip(POSE_REQUIRED) {
        match person.keypoint(index) {
            Some(kp) if kp.is_detected() => *slot = kp,
            _ => return false,
        }
    }
    let [l_shoulder, r_shoulder, l_hip, r_hip, l_ankle, r_ankle] = points;

    let torso = l_shoulder
        .midpoint(&r_shoulder)
        .distance(&l_hip.midpoint(&r_hip));
    let left_drop = (l_ankle.y - l_shoulder.y).abs();
    let right_drop = (r_ankle.y - r_shoulder.y).abs();
    left_drop < torso || right_drop < torso
}

/// Fallen when every visible keypoint of some person lies below the
/// horizontal midline of the image.
pub fn bottom_fallen(detections: &[PersonDetection], image_height: u32) -> bool {
    let midline = (image_height / 2) as f32;
    detections.iter().any(|person| {
        let mut visible = person.detected_keypoints().peekable();
        visible.peek().is_some() && visible.all(|kp| kp.y > midline)
    })
}

#[cfg(test)]
mod tests {
    use ml_core::Keypoint;

    use super::*;

    fn boxed(bbox: [f32; 4]) -> PersonDetection {
        PersonDetection {
            bbox: Some(bbox),
            ..Default::default()
        }
    }

    fn skeleton(points: &[(KeypointIndex, (f32, f32))]) -> PersonDetection {
        let mut keypoints = vec![Keypoint::default(); KeypointIndex::COUNT];
        for (index, (x, y)) in points {
            keypoints[*index as usize] = Keypoint::new(*x, *y);
        }
        PersonDetection {
            keypoints,
            ..Default::default()
        }
    }

    fn standing() -> PersonDetection {
        use KeypointIndex::*;
        skeleton(&[
            (LeftShoulder, (90.0, 100.0)),
            (RightShoulder, (110.0, 100.0)),
            (LeftHip, (92.0, 160.0)),
            (RightHip, (108.0, 160.0)),
            (LeftAnkle, (92.0, 260.0)),
            (RightAnkle, (108.0, 260.0)),
        ])
    }

    fn lying() -> PersonDetection {
        use KeypointIndex::*;
        skeleton(&[
            (LeftShoulder, (100.0, 300.0)),
            (RightShoulder, (100.0, 315.0)),
            (LeftHip, (160.0, 302.0)),
            (RightHip, (160.0, 317.0)),
            (LeftAnkle, (260.0, 305.0)),
            (RightAnkle, (260.0, 320.0)),
        ])
    }

    #[test]
    fn wide_boxes_are_fallen() {
        let analysis = analyze_boxes(&[boxed([0.0, 0.0, 40.0, 100.0]), boxed([0.0, 0.0, 100.0, 40.0])]);
        assert!(analysis.fallen);
        assert_eq!(analysis.person_count, 2);
        assert_eq!(analysis.people[0], (Centroid::new(20.0, 50.0), false));
        assert_eq!(analysis.people[1], (Centroid::new(50.0, 20.0), true));
    }

    #[test]
    fn square_and_tall_boxes_are_upright() {
        let analysis = analyze_boxes(&[boxed([0.0, 0.0, 50.0, 50.0])]);
        assert!(!analysis.fallen);
        assert_eq!(analyze_boxes(&[]), BoxAnalysis::default());
    }

    #[test]
    fn detections_without_boxes_are_not_counted() {
        let analysis = analyze_boxes(&[standing()]);
        assert_eq!(analysis.person_count, 0);
    }

    #[test]
    fn pose_geometry_separates_standing_from_lying() {
        assert!(!pose_fallen(&[standing()]));
        assert!(pose_fallen(&[lying()]));
        assert!(pose_fallen(&[standing(), lying()]));
    }

    #[test]
    fn pose_geometry_needs_every_required_joint() {
        let mut partial = lying();
        partial.keypoints[KeypointIndex::RightAnkle as usize] = Keypoint::default();
        assert!(!pose_fallen(&[partial]));

        let mut short = lying();
        short.keypoints.truncate(16);
        assert!(!pose_fallen(&[short]));
    }

    #[test]
    fn bottom_fraction_requires_all_visible_points_below_midline() {
        // 480 high: midline at 240
        assert!(bottom_fallen(&[lying()], 480));
        assert!(!bottom_fallen(&[standing()], 480));
        assert!(!bottom_fallen(&[skeleton(&[])], 480));

        let on_line = skeleton(&[(KeypointIndex::Nose, (10.0, 240.0))]);
        assert!(!bottom_fallen(&[on_line], 480));
    }

    #[test]
    fn policies_follow_heuristic() {
        assert_eq!(Heuristic::BoxAspect.policy(), TriggerPolicy::Level);
        for heuristic in &Heuristic::ALL[1..] {
            assert_eq!(heuristic.policy(), TriggerPolicy::Edge);
        }
    }
}

//! Horizontal position bucketing.
//!
//! Both the landmark path and the object-detector path feed a normalized
//! horizontal centre through the same [`PositionBands`], so the robot turns
//! the same way whichever model is running.
//!
//! Comparisons against the band edges are strict: a centre that lands exactly
//! on `low` or `high` is [`Position::Center`].

use cobot_types::{Detection, LandmarkSet, Position};

use crate::geometry::{best_person, shoulder_center_x};

/// How image x-coordinates relate to the robot's left and right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorConvention {
    /// Front-facing camera: the image is a mirror, so a person on the low-x
    /// side of the frame stands to the robot's right.
    #[default]
    Mirrored,
    /// Rear-facing camera: low x is the robot's left.
    Direct,
}

impl MirrorConvention {
    /// Parse `"mirrored"` / `"direct"` (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mirrored" | "mirror" | "front" => Some(MirrorConvention::Mirrored),
            "direct" | "rear" => Some(MirrorConvention::Direct),
            _ => None,
        }
    }
}

/// Threshold bands for the horizontal centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionBands {
    pub low: f32,
    pub high: f32,
    pub mirror: MirrorConvention,
}

impl Default for PositionBands {
    fn default() -> Self {
        Self {
            low: 0.4,
            high: 0.6,
            mirror: MirrorConvention::Mirrored,
        }
    }
}

impl PositionBands {
    /// Bucket a normalized centre.  Non-finite input is [`Position::NotVisible`].
    pub fn bucket(&self, center_x: f32) -> Position {
        if !center_x.is_finite() {
            return Position::NotVisible;
        }
        let (low_side, high_side) = match self.mirror {
            MirrorConvention::Mirrored => (Position::Right, Position::Left),
            MirrorConvention::Direct => (Position::Left, Position::Right),
        };
        if center_x < self.low {
            low_side
        } else if center_x > self.high {
            high_side
        } else {
            Position::Center
        }
    }

    /// Position from the shoulder midpoint; missing shoulders are
    /// [`Position::NotVisible`].
    pub fn from_landmarks(&self, landmarks: &LandmarkSet) -> Position {
        shoulder_center_x(landmarks)
            .map(|cx| self.bucket(cx))
            .unwrap_or(Position::NotVisible)
    }

    /// Position of the most confident person detection.
    pub fn from_detections(&self, detections: &[Detection]) -> Position {
        best_person(detections)
            .map(|d| self.bucket(d.bounding_box.center_x()))
            .unwrap_or(Position::NotVisible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobot_types::{BoundingBox, Landmark, pose};

    #[test]
    fn mirrored_bands() {
        let bands = PositionBands::default();
        assert_eq!(bands.bucket(0.2), Position::Right);
        assert_eq!(bands.bucket(0.5), Position::Center);
        assert_eq!(bands.bucket(0.8), Position::Left);
    }

    #[test]
    fn direct_bands_swap_sides() {
        let bands = PositionBands {
            mirror: MirrorConvention::Direct,
            ..Default::default()
        };
        assert_eq!(bands.bucket(0.2), Position::Left);
        assert_eq!(bands.bucket(0.8), Position::Right);
    }

    #[test]
    fn boundaries_resolve_to_center() {
        let bands = PositionBands::default();
        assert_eq!(bands.bucket(0.4), Position::Center);
        assert_eq!(bands.bucket(0.6), Position::Center);
    }

    #[test]
    fn nan_is_not_visible() {
        assert_eq!(PositionBands::default().bucket(f32::NAN), Position::NotVisible);
    }

    #[test]
    fn empty_landmarks_are_not_visible() {
        let bands = PositionBands::default();
        assert_eq!(bands.from_landmarks(&LandmarkSet::empty()), Position::NotVisible);
    }

    #[test]
    fn landmark_and_detection_paths_agree() {
        let bands = PositionBands::default();
        let mut points = vec![Landmark::new(0.5, 0.5, 0.0); 33];
        points[pose::LEFT_SHOULDER] = Landmark::new(0.15, 0.3, 0.0);
        points[pose::RIGHT_SHOULDER] = Landmark::new(0.25, 0.3, 0.0);
        let from_pose = bands.from_landmarks(&LandmarkSet::new(points));

        let dets = vec![Detection {
            label: "person".into(),
            confidence: 0.9,
            bounding_box: BoundingBox::new(0.1, 0.1, 0.3, 0.9),
        }];
        let from_dets = bands.from_detections(&dets);

        assert_eq!(from_pose, Position::Right);
        assert_eq!(from_pose, from_dets);
    }

    #[test]
    fn no_person_detection_is_not_visible() {
        assert_eq!(PositionBands::default().from_detections(&[]), Position::NotVisible);
    }

    #[test]
    fn parse_mirror_convention() {
        assert_eq!(MirrorConvention::parse("Direct"), Some(MirrorConvention::Direct));
        assert_eq!(MirrorConvention::parse("mirrored"), Some(MirrorConvention::Mirrored));
        assert_eq!(MirrorConvention::parse("sideways"), None);
    }
}

//! Landmark geometry helpers.
//!
//! A pose model reports 33 landmarks; following only needs the torso.  The
//! focus box is the tight rectangle around the nose, both shoulders and both
//! hips, and is used to decide whether a person is framed well enough (and
//! far enough away) to drive towards.

use cobot_types::{BoundingBox, Detection, Distance, LandmarkSet, pose};

/// Minimum focus-box width before a person counts as framed.
pub const MIN_BOX_WIDTH: f32 = 0.06;
/// Minimum focus-box height before a person counts as framed.
pub const MIN_BOX_HEIGHT: f32 = 0.2;

/// Label the object detector uses for people.
pub const PERSON_LABEL: &str = "person";

/// Horizontal centre of the shoulder pair, or `None` when either shoulder is
/// missing.
pub fn shoulder_center_x(landmarks: &LandmarkSet) -> Option<f32> {
    let left = landmarks.get(pose::LEFT_SHOULDER)?;
    let right = landmarks.get(pose::RIGHT_SHOULDER)?;
    Some((left.x + right.x) / 2.0)
}

/// Tight box around the torso landmarks.
///
/// Returns `None` unless every torso landmark is present and the resulting
/// box has a non-zero area.
pub fn focus_box(landmarks: &LandmarkSet) -> Option<BoundingBox> {
    let mut points = Vec::with_capacity(pose::TORSO.len());
    for index in pose::TORSO {
        points.push(landmarks.get(index)?);
    }

    let (mut left, mut top) = (f32::INFINITY, f32::INFINITY);
    let (mut right, mut bottom) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in points {
        left = left.min(p.x);
        right = right.max(p.x);
        top = top.min(p.y);
        bottom = bottom.max(p.y);
    }

    let bbox = BoundingBox::new(left, top, right, bottom);
    (!bbox.is_degenerate()).then_some(bbox)
}

/// `true` when the box is too small, or wider than tall, to be a standing
/// person worth following.
pub fn is_too_small(bbox: &BoundingBox) -> bool {
    bbox.width() < MIN_BOX_WIDTH || bbox.height() < MIN_BOX_HEIGHT || bbox.width() > bbox.height()
}

/// Coarse distance bucket from the box height.
pub fn estimate_distance(bbox: &BoundingBox) -> Distance {
    let h = bbox.height();
    if h > 0.4 {
        Distance::VeryClose
    } else if h > 0.25 {
        Distance::Close
    } else if h > 0.15 {
        Distance::Medium
    } else if h > 0.05 {
        Distance::Far
    } else {
        Distance::VeryFar
    }
}

/// Highest-confidence, non-degenerate person detection.
pub fn best_person(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.label.eq_ignore_ascii_case(PERSON_LABEL))
        .filter(|d| !d.bounding_box.is_degenerate())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

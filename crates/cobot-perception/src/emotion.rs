//! Emotion classification from face blendshapes.
//!
//! Four scalar features are derived from the blendshape map and fed through a
//! fixed decision tree.  The first matching rule wins:
//!
//! | order | rule                  | default | result      |
//! |-------|-----------------------|---------|-------------|
//! | 1     | `smile >`             | 0.2     | `Happy`     |
//! | 2     | `eye_squint >=`       | 0.35    | `Angry`     |
//! | 3     | `mouth_open >`        | 0.2     | `Surprised` |
//! | 4     | `shrug >`             | 0.7     | `Sad`       |
//! | –     | otherwise             |         | `Neutral`   |
//!
//! # Example
//!
//! ```rust
//! use cobot_perception::emotion::{EmotionFeatures, EmotionThresholds};
//! use cobot_types::Emotion;
//!
//! let features = EmotionFeatures { smile: 0.3, eye_squint: 0.5, mouth_open: 0.0, shrug: 0.0 };
//! assert_eq!(features.classify(&EmotionThresholds::default()), Emotion::Happy);
//! ```

use cobot_types::{BlendshapeScores, Emotion};

pub const MOUTH_SMILE_LEFT: &str = "mouthSmileLeft";
pub const MOUTH_SMILE_RIGHT: &str = "mouthSmileRight";
pub const EYE_SQUINT_LEFT: &str = "eyeSquintLeft";
pub const EYE_SQUINT_RIGHT: &str = "eyeSquintRight";
pub const JAW_OPEN: &str = "jawOpen";
pub const MOUTH_SHRUG_LOWER: &str = "mouthShrugLower";

/// Cut-offs for the emotion decision tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionThresholds {
    pub smile: f32,
    pub eye_squint: f32,
    pub mouth_open: f32,
    pub shrug: f32,
}

impl Default for EmotionThresholds {
    fn default() -> Self {
        Self {
            smile: 0.2,
            eye_squint: 0.35,
            mouth_open: 0.2,
            shrug: 0.7,
        }
    }
}

/// Features the decision tree looks at.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmotionFeatures {
    /// Mean of the left and right mouth-smile scores.
    pub smile: f32,
    /// Mean of the left and right eye-squint scores.
    pub eye_squint: f32,
    /// Jaw-open score.
    pub mouth_open: f32,
    /// Mouth-shrug-lower score.
    pub shrug: f32,
}

impl EmotionFeatures {
    pub fn from_scores(scores: &BlendshapeScores) -> Self {
        Self {
            smile: (scores.score(MOUTH_SMILE_LEFT) + scores.score(MOUTH_SMILE_RIGHT)) / 2.0,
            eye_squint: (scores.score(EYE_SQUINT_LEFT) + scores.score(EYE_SQUINT_RIGHT)) / 2.0,
            mouth_open: scores.score(JAW_OPEN),
            shrug: scores.score(MOUTH_SHRUG_LOWER),
        }
    }

    /// Run the decision tree.  Never returns [`Emotion::Sleeping`]; that state
    /// only comes from the stabilizer.
    pub fn classify(&self, t: &EmotionThresholds) -> Emotion {
        if self.smile > t.smile {
            Emotion::Happy
        } else if self.eye_squint >= t.eye_squint {
            Emotion::Angry
        } else if self.mouth_open > t.mouth_open {
            Emotion::Surprised
        } else if self.shrug > t.shrug {
            Emotion::Sad
        } else {
            Emotion::Neutral
        }
    }
}

//! The ML runtime seam.
//!
//! An [`InferenceAdapter`] turns one [`Frame`] into one [`Observation`].  It
//! returns exactly one variant: landmarks, detections, blendshapes or
//! [`Observation::Nothing`], never a partially filled result.
//!
//! Model loading is not handled here.  A [`PerceptionBackend`] hands out a
//! ready camera/model pair for a mode, and the pipeline releases both when it
//! shuts down.

use cobot_perception::PerceptionMode;
use cobot_types::{CobotError, Observation};

use crate::frame::{Frame, FrameSource};

/// Wraps a pose, face or object model.
pub trait InferenceAdapter: Send {
    /// Run the model on one frame.
    ///
    /// # Errors
    ///
    /// [`CobotError::Inference`] when the model throws or the frame is
    /// malformed.  The caller degrades the cycle to "no detection".
    fn infer(&mut self, frame: &Frame) -> Result<Observation, CobotError>;

    /// Release the model handle.  Called once when the pipeline stops.
    fn close(&mut self) {}
}

/// Opens the camera and model used by a perception mode.
pub trait PerceptionBackend: Send + Sync {
    /// # Errors
    ///
    /// Any error opening the camera or loading the model; the pipeline is
    /// not started.
    fn open(
        &self,
        mode: PerceptionMode,
    ) -> Result<(Box<dyn FrameSource>, Box<dyn InferenceAdapter>), CobotError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockModel {
        closed: bool,
    }

    impl InferenceAdapter for MockModel {
        fn infer(&mut self, frame: &Frame) -> Result<Observation, CobotError> {
            if frame.data.is_empty() {
                return Err(CobotError::Inference("empty frame".into()));
            }
            Ok(Observation::Nothing)
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn malformed_frame_is_an_inference_error() {
        let mut model = MockModel { closed: false };
        let bad = Frame::new(1, 0, 0, Vec::new());
        assert!(matches!(model.infer(&bad), Err(CobotError::Inference(_))));
        let good = Frame::new(2, 1, 1, vec![0; 4]);
        assert_eq!(model.infer(&good), Ok(Observation::Nothing));
        model.close();
        assert!(model.closed);
    }
}

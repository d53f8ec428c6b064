//! Camera frames and the [`FrameSource`] seam.

use std::time::Instant;

use cobot_types::CobotError;

/// One captured image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic capture counter, assigned by the source.
    pub sequence: u64,
    pub captured_at: Instant,
    pub width: u32,
    pub height: u32,
    /// Raw pixel data (e.g. RGBA8888).
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            sequence,
            captured_at: Instant::now(),
            width,
            height,
            data,
        }
    }
}

/// Supplier of camera frames.
///
/// Implementations wrap the platform camera; the pipeline calls
/// [`capture`][FrameSource::capture] once per cadence tick.
pub trait FrameSource: Send {
    /// Stable identifier, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Grab the most recent frame.
    ///
    /// # Errors
    ///
    /// [`CobotError::Inference`] or [`CobotError::Transport`] when no frame
    /// is available; the tick is skipped.
    fn capture(&mut self) -> Result<Frame, CobotError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockCamera {
        next: u64,
    }

    impl FrameSource for MockCamera {
        fn id(&self) -> &str {
            "front"
        }

        fn capture(&mut self) -> Result<Frame, CobotError> {
            self.next += 1;
            Ok(Frame::new(self.next, 2, 2, vec![0u8; 2 * 2 * 4]))
        }
    }

    #[test]
    fn mock_camera_numbers_frames() {
        let mut cam = MockCamera { next: 0 };
        assert_eq!(cam.id(), "front");
        let a = cam.capture().unwrap();
        let b = cam.capture().unwrap();
        assert_eq!((a.sequence, b.sequence), (1, 2));
        assert!(b.captured_at >= a.captured_at);
        assert_eq!(a.data.len(), 16);
    }
}

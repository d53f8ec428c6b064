//! In-process stand-ins for the camera and the ML runtime.
//!
//! A [`Scene`] holds what the simulated camera "sees".  [`ScriptedBackend`]
//! hands out a [`SyntheticCamera`] and a [`ScriptedModel`] that reports the
//! current scene for every frame, so the whole pipeline can be driven from a
//! REPL or a test without a camera or a model.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use cobot_perception::PerceptionMode;
use cobot_types::{BlendshapeScores, CobotError, Command, Landmark, LandmarkSet, Observation, pose};
use tracing::debug;

use crate::frame::{Frame, FrameSource};
use crate::inference::{InferenceAdapter, PerceptionBackend};
use crate::pipeline::CommandSink;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pose of a standing person whose shoulders are centred on `center_x`,
/// framed at a comfortable following distance.
pub fn person_at(center_x: f32) -> Observation {
    let mut points = vec![Landmark::new(center_x, 0.5, 0.0); 33];
    points[pose::NOSE] = Landmark::new(center_x, 0.2, 0.0);
    points[pose::LEFT_SHOULDER] = Landmark::new(center_x - 0.05, 0.3, 0.0);
    points[pose::RIGHT_SHOULDER] = Landmark::new(center_x + 0.05, 0.3, 0.0);
    points[pose::LEFT_HIP] = Landmark::new(center_x - 0.03, 0.5, 0.0);
    points[pose::RIGHT_HIP] = Landmark::new(center_x + 0.03, 0.5, 0.0);
    Observation::Pose(LandmarkSet::new(points))
}

/// Face with the given blendshape scores.
pub fn face(scores: &[(&str, f32)]) -> Observation {
    Observation::face(scores.iter().map(|&(name, score)| (name, score)).collect::<BlendshapeScores>())
}

// ────────────────────────────────────────────────────────────────────────────
// Scene
// ────────────────────────────────────────────────────────────────────────────

/// Shared, mutable view of the simulated world.  Clones share state.
#[derive(Debug, Clone)]
pub struct Scene {
    current: Arc<Mutex<Observation>>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(Observation::Nothing)
    }
}

impl Scene {
    pub fn new(initial: Observation) -> Self {
        Self {
            current: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn set(&self, observation: Observation) {
        *lock(&self.current) = observation;
    }

    pub fn get(&self) -> Observation {
        lock(&self.current).clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera and model
// ────────────────────────────────────────────────────────────────────────────

/// Produces small blank frames, or fails every capture when built with
/// [`failing`][Self::failing].
#[derive(Debug)]
pub struct SyntheticCamera {
    id: String,
    next: u64,
    fail: bool,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new("synthetic")
    }
}

impl SyntheticCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            next: 0,
            fail: false,
        }
    }

    pub fn failing(id: impl Into<String>) -> Self {
        Self {
            fail: true,
            ..Self::new(id)
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<Frame, CobotError> {
        if self.fail {
            return Err(CobotError::Inference(format!("camera {} unavailable", self.id)));
        }
        self.next += 1;
        Ok(Frame::new(self.next, 4, 4, vec![0u8; 4 * 4 * 4]))
    }
}

/// Reports the current [`Scene`] for every frame.
#[derive(Debug)]
pub struct ScriptedModel {
    scene: Scene,
    closed: Arc<AtomicBool>,
}

impl ScriptedModel {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that flips once the model has been closed.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl InferenceAdapter for ScriptedModel {
    fn infer(&mut self, frame: &Frame) -> Result<Observation, CobotError> {
        if frame.data.is_empty() {
            return Err(CobotError::Inference(format!("frame {} has no pixels", frame.sequence)));
        }
        Ok(self.scene.get())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Backend
// ────────────────────────────────────────────────────────────────────────────

/// [`PerceptionBackend`] over a shared [`Scene`].
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scene: Scene,
    opened: AtomicU64,
    fail_open: Mutex<Option<String>>,
    last_model: Mutex<Option<Arc<AtomicBool>>>,
}

impl ScriptedBackend {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene,
            ..Self::default()
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Number of successful `open` calls.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// `true` when the most recently opened model has been closed.
    pub fn last_model_closed(&self) -> bool {
        lock(&self.last_model)
            .as_ref()
            .is_some_and(|closed| closed.load(Ordering::SeqCst))
    }

    /// Every subsequent `open` fails with `reason`; `None` heals.
    pub fn fail_open(&self, reason: Option<String>) {
        *lock(&self.fail_open) = reason;
    }
}

impl PerceptionBackend for ScriptedBackend {
    fn open(
        &self,
        mode: PerceptionMode,
    ) -> Result<(Box<dyn FrameSource>, Box<dyn InferenceAdapter>), CobotError> {
        if let Some(reason) = lock(&self.fail_open).clone() {
            return Err(CobotError::Inference(reason));
        }
        let camera = match mode {
            PerceptionMode::Follow => SyntheticCamera::new("front"),
            PerceptionMode::Emotion => SyntheticCamera::new("selfie"),
        };
        let model = ScriptedModel::new(self.scene.clone());
        *lock(&self.last_model) = Some(model.closed_flag());
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!(%mode, "scripted backend opened");
        Ok((Box::new(camera), Box::new(model)))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Command log
// ────────────────────────────────────────────────────────────────────────────

/// [`CommandSink`] that only records, for dry runs and tests.
#[derive(Debug, Default)]
pub struct CommandLog {
    commands: Mutex<Vec<Command>>,
}

impl CommandLog {
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.commands).clone()
    }

    pub fn clear(&self) {
        lock(&self.commands).clear();
    }
}

#[async_trait]
impl CommandSink for CommandLog {
    async fn send(&self, command: Command) -> bool {
        debug!(%command, "dry run");
        lock(&self.commands).push(command);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_model_follows_scene() {
        let scene = Scene::default();
        let mut model = ScriptedModel::new(scene.clone());
        let mut camera = SyntheticCamera::default();
        let frame = camera.capture().unwrap();

        assert_eq!(model.infer(&frame).unwrap(), Observation::Nothing);
        scene.set(person_at(0.3));
        assert!(matches!(model.infer(&frame).unwrap(), Observation::Pose(_)));
    }

    #[test]
    fn failing_camera_reports_inference_error() {
        let mut camera = SyntheticCamera::failing("front");
        assert!(matches!(camera.capture(), Err(CobotError::Inference(_))));
    }

    #[test]
    fn backend_tracks_opened_models() {
        let backend = ScriptedBackend::default();
        let (_, mut model) = backend.open(PerceptionMode::Emotion).unwrap();
        assert_eq!(backend.opened(), 1);
        assert!(!backend.last_model_closed());
        model.close();
        assert!(backend.last_model_closed());

        backend.fail_open(Some("no model file".into()));
        assert!(backend.open(PerceptionMode::Follow).is_err());
        assert_eq!(backend.opened(), 1);
    }

    #[test]
    fn person_at_is_followable() {
        let Observation::Pose(landmarks) = person_at(0.5) else {
            panic!("expected a pose");
        };
        let bbox = cobot_perception::geometry::focus_box(&landmarks).unwrap();
        assert!(!cobot_perception::geometry::is_too_small(&bbox));
    }

    #[tokio::test]
    async fn command_log_records() {
        let log = CommandLog::default();
        assert!(log.send(Command::Happy).await);
        assert_eq!(log.commands(), vec![Command::Happy]);
        log.clear();
        assert!(log.commands().is_empty());
    }
}

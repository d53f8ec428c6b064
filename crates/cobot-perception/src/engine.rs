//! Decision Engine.
//!
//! [`decide`] is the pure core: previous [`EngineState`] + one
//! [`Observation`] + a monotonic timestamp in, symbolic state + next
//! [`EngineState`] out.  [`DecisionEngine`] wraps it for the runtime and is
//! the single writer of the latest [`Decision`], which it publishes through a
//! `tokio::sync::watch` channel so any number of readers can observe it
//! without locking.  Readers that must see every decision in order, not just
//! the latest, take a [`feed`][DecisionEngine::feed].
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//! use cobot_perception::engine::{DecisionEngine, EngineConfig, PerceptionMode};
//! use cobot_types::{Observation, Position, SymbolicState};
//!
//! let mut engine = DecisionEngine::new(EngineConfig::for_mode(PerceptionMode::Follow));
//! let rx = engine.subscribe();
//!
//! let state = engine.observe(&Observation::Nothing, Instant::now());
//! assert_eq!(state, Some(SymbolicState::Position(Position::NotVisible)));
//! assert_eq!(rx.borrow().as_ref().map(|d| d.state), state);
//! ```

use std::fmt;
use std::time::Instant;

use cobot_types::{BoundingBox, Distance, Emotion, Gesture, Observation, Position, RemoteMode, SymbolicState};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::emotion::{EmotionFeatures, EmotionThresholds};
use crate::geometry::{best_person, estimate_distance, focus_box, is_too_small};
use crate::position::PositionBands;
use crate::smoothing::Debouncer;
use crate::stabilizer::{DwellTimes, EmotionStabilizer};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Which symbolic category the engine is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerceptionMode {
    /// Track a person's horizontal position.
    #[default]
    Follow,
    /// Classify the facing person's emotion.
    Emotion,
}

impl PerceptionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "follow" => Some(PerceptionMode::Follow),
            "emotion" => Some(PerceptionMode::Emotion),
            _ => None,
        }
    }
}

impl From<RemoteMode> for PerceptionMode {
    fn from(mode: RemoteMode) -> Self {
        match mode {
            RemoteMode::Follow => PerceptionMode::Follow,
            RemoteMode::Emotion => PerceptionMode::Emotion,
        }
    }
}

impl fmt::Display for PerceptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerceptionMode::Follow => write!(f, "follow"),
            PerceptionMode::Emotion => write!(f, "emotion"),
        }
    }
}

/// Everything [`decide`] needs besides state and input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub mode: PerceptionMode,
    pub bands: PositionBands,
    pub thresholds: EmotionThresholds,
    pub dwell: DwellTimes,
    /// Consecutive frames needed before a position change is published.
    pub confirm_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: PerceptionMode::Follow,
            bands: PositionBands::default(),
            thresholds: EmotionThresholds::default(),
            dwell: DwellTimes::default(),
            confirm_frames: 1,
        }
    }
}

impl EngineConfig {
    pub fn for_mode(mode: PerceptionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

/// The framed person behind a positional decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subject {
    pub bounding_box: BoundingBox,
    pub distance: Distance,
    /// Box too small, or wider than tall, to be worth following.
    pub too_small: bool,
}

impl Subject {
    pub fn from_box(bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            distance: estimate_distance(&bounding_box),
            too_small: is_too_small(&bounding_box),
        }
    }
}

/// Timer and smoothing state carried between cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    position: Debouncer<Position>,
    emotion: EmotionStabilizer,
    subject: Option<Subject>,
}

impl EngineState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            position: Debouncer::new(Position::NotVisible, config.confirm_frames),
            emotion: EmotionStabilizer::new(),
            subject: None,
        }
    }

    /// Person framed by the most recent positional observation.
    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn position(&self) -> Position {
        self.position.confirmed()
    }

    pub fn emotion(&self) -> &EmotionStabilizer {
        &self.emotion
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// decide
// ────────────────────────────────────────────────────────────────────────────

/// One decision cycle.
///
/// Returns `None` only for observations that belong to the other mode (a
/// face in follow mode, a pose in emotion mode); the state is then returned
/// unchanged.  Otherwise the result is total: missing people are
/// [`Position::NotVisible`], missing faces are read as neutral.
pub fn decide(
    config: &EngineConfig,
    state: &EngineState,
    observation: &Observation,
    now: Instant,
) -> (Option<SymbolicState>, EngineState) {
    let mut next = state.clone();

    match config.mode {
        PerceptionMode::Follow => {
            let (raw, subject) = match observation {
                Observation::Pose(landmarks) => (
                    config.bands.from_landmarks(landmarks),
                    focus_box(landmarks).map(Subject::from_box),
                ),
                Observation::Objects(detections) => (
                    config.bands.from_detections(detections),
                    best_person(detections).map(|d| Subject::from_box(d.bounding_box)),
                ),
                Observation::Nothing => (Position::NotVisible, None),
                Observation::Face { .. } | Observation::Hand(_) => return (None, next),
            };
            next.subject = subject;
            let confirmed = next.position.push(raw);
            (Some(SymbolicState::Position(confirmed)), next)
        }
        PerceptionMode::Emotion => {
            let reading = match observation {
                Observation::Face { scores, .. } => {
                    EmotionFeatures::from_scores(scores).classify(&config.thresholds)
                }
                Observation::Hand(_) | Observation::Nothing => Emotion::Neutral,
                Observation::Pose(_) | Observation::Objects(_) => return (None, next),
            };
            let (emitted, emotion) = state.emotion.step(&config.dwell, reading, now);
            next.emotion = emotion;
            (Some(SymbolicState::Emotion(emitted)), next)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DecisionEngine
// ────────────────────────────────────────────────────────────────────────────

/// Latest output of the engine as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub state: SymbolicState,
    pub subject: Option<Subject>,
    /// Hand gesture seen in the same frame (emotion mode only).
    pub gesture: Option<Gesture>,
    /// When the observation behind this decision was made.
    pub at: Instant,
}

/// Stateful wrapper around [`decide`] and single writer of the latest
/// [`Decision`].
pub struct DecisionEngine {
    config: EngineConfig,
    state: EngineState,
    publisher: watch::Sender<Option<Decision>>,
    feed: Option<mpsc::Sender<Decision>>,
}

/// Decisions buffered for a [`feed`][DecisionEngine::feed] reader.
pub const FEED_CAPACITY: usize = 16;

impl DecisionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            state: EngineState::new(&config),
            config,
            publisher,
            feed: None,
        }
    }

    /// Receive every decision in order.  Only one feed exists; taking a new
    /// one closes the previous receiver.  When the reader falls
    /// [`FEED_CAPACITY`] decisions behind, newer ones are skipped for it.
    pub fn feed(&mut self) -> mpsc::Receiver<Decision> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.feed = Some(tx);
        rx
    }

    /// Subscribe to every published [`Decision`].
    pub fn subscribe(&self) -> watch::Receiver<Option<Decision>> {
        self.publisher.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn mode(&self) -> PerceptionMode {
        self.config.mode
    }

    /// Switch category.  Timers and smoothing restart, and readers see
    /// `None` until the next observation.
    pub fn set_mode(&mut self, mode: PerceptionMode) {
        if self.config.mode == mode {
            return;
        }
        debug!(from = %self.config.mode, to = %mode, "perception mode switched");
        self.config.mode = mode;
        self.state = EngineState::new(&self.config);
        self.publisher.send_replace(None);
    }

    /// Run one cycle and publish the result.
    pub fn observe(&mut self, observation: &Observation, now: Instant) -> Option<SymbolicState> {
        let previous = self.publisher.borrow().as_ref().map(|d| d.state);
        let (result, next) = decide(&self.config, &self.state, observation, now);
        self.state = next;

        let state = result?;
        if previous != Some(state) {
            debug!(state = %state, "symbolic state changed");
        }
        let decision = Decision {
            state,
            subject: self.state.subject,
            gesture: match self.config.mode {
                PerceptionMode::Emotion => observation.gesture(),
                PerceptionMode::Follow => None,
            },
            at: now,
        };
        self.publisher.send_replace(Some(decision));
        if let Some(feed) = &self.feed
            && let Err(mpsc::error::TrySendError::Full(_)) = feed.try_send(decision)
        {
            warn!(state = %state, "decision feed full, reader skipped a decision");
        }
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobot_types::{BlendshapeScores, Detection, Landmark, LandmarkSet, pose};
    use std::time::Duration;

    fn person_at(center_x: f32) -> Observation {
        let mut points = vec![Landmark::new(center_x, 0.5, 0.0); 33];
        points[pose::NOSE] = Landmark::new(center_x, 0.2, 0.0);
        points[pose::LEFT_SHOULDER] = Landmark::new(center_x - 0.05, 0.35, 0.0);
        points[pose::RIGHT_SHOULDER] = Landmark::new(center_x + 0.05, 0.35, 0.0);
        points[pose::LEFT_HIP] = Landmark::new(center_x - 0.04, 0.55, 0.0);
        points[pose::RIGHT_HIP] = Landmark::new(center_x + 0.04, 0.55, 0.0);
        Observation::Pose(LandmarkSet::new(points))
    }

    fn face(pairs: &[(&str, f32)]) -> Observation {
        Observation::face(pairs.iter().map(|&(k, v)| (k, v)).collect::<BlendshapeScores>())
    }

    fn happy() -> Observation {
        face(&[("mouthSmileLeft", 0.6), ("mouthSmileRight", 0.6)])
    }

    fn angry() -> Observation {
        face(&[("eyeSquintLeft", 0.6), ("eyeSquintRight", 0.6)])
    }

    #[test]
    fn follow_thresholds() {
        let cfg = EngineConfig::for_mode(PerceptionMode::Follow);
        let t = Instant::now();
        for (cx, expected) in [(0.2, Position::Right), (0.5, Position::Center), (0.8, Position::Left)] {
            let (s, _) = decide(&cfg, &EngineState::new(&cfg), &person_at(cx), t);
            assert_eq!(s, Some(SymbolicState::Position(expected)), "cx = {cx}");
        }
    }

    #[test]
    fn follow_records_subject() {
        let cfg = EngineConfig::default();
        let (_, st) = decide(&cfg, &EngineState::new(&cfg), &person_at(0.5), Instant::now());
        let subject = st.subject().unwrap();
        assert!(!subject.too_small);
        assert_eq!(subject.distance, Distance::Close);
    }

    #[test]
    fn detections_feed_the_same_bands() {
        let cfg = EngineConfig::default();
        let obs = Observation::Objects(vec![Detection {
            label: "person".into(),
            confidence: 0.9,
            bounding_box: BoundingBox::new(0.7, 0.2, 0.9, 0.7),
        }]);
        let (s, st) = decide(&cfg, &EngineState::new(&cfg), &obs, Instant::now());
        assert_eq!(s, Some(SymbolicState::Position(Position::Left)));
        assert!(st.subject().is_some());
    }

    #[test]
    fn nothing_in_follow_mode_is_not_visible() {
        let cfg = EngineConfig::default();
        let (_, st) = decide(&cfg, &EngineState::new(&cfg), &person_at(0.5), Instant::now());
        let (s, st) = decide(&cfg, &st, &Observation::Nothing, Instant::now());
        assert_eq!(s, Some(SymbolicState::Position(Position::NotVisible)));
        assert!(st.subject().is_none());
    }

    #[test]
    fn foreign_observation_is_ignored() {
        let cfg = EngineConfig::for_mode(PerceptionMode::Follow);
        let st = EngineState::new(&cfg);
        let (s, next) = decide(&cfg, &st, &happy(), Instant::now());
        assert_eq!(s, None);
        assert_eq!(next, st);
    }

    #[test]
    fn debounced_position_waits_for_confirmation() {
        let cfg = EngineConfig {
            confirm_frames: 2,
            ..EngineConfig::default()
        };
        let t = Instant::now();
        let (s, st) = decide(&cfg, &EngineState::new(&cfg), &person_at(0.2), t);
        assert_eq!(s, Some(SymbolicState::Position(Position::NotVisible)));
        let (s, _) = decide(&cfg, &st, &person_at(0.2), t);
        assert_eq!(s, Some(SymbolicState::Position(Position::Right)));
    }

    #[test]
    fn angry_lock_survives_happy_inputs() {
        let cfg = EngineConfig::for_mode(PerceptionMode::Emotion);
        let t0 = Instant::now();
        let (s, mut st) = decide(&cfg, &EngineState::new(&cfg), &angry(), t0);
        assert_eq!(s, Some(SymbolicState::Emotion(Emotion::Angry)));

        for i in 1..5 {
            let (s, next) = decide(&cfg, &st, &happy(), t0 + Duration::from_secs(2 * i));
            assert_eq!(s, Some(SymbolicState::Emotion(Emotion::Angry)));
            st = next;
        }
        let (s, _) = decide(&cfg, &st, &happy(), t0 + Duration::from_secs(10));
        assert_eq!(s, Some(SymbolicState::Emotion(Emotion::Neutral)));
    }

    #[test]
    fn missing_face_counts_as_neutral() {
        let cfg = EngineConfig::for_mode(PerceptionMode::Emotion);
        let t0 = Instant::now();
        let (s, st) = decide(&cfg, &EngineState::new(&cfg), &Observation::Nothing, t0);
        assert_eq!(s, Some(SymbolicState::Emotion(Emotion::Neutral)));
        let (s, _) = decide(&cfg, &st, &Observation::Nothing, t0 + Duration::from_secs(10));
        assert_eq!(s, Some(SymbolicState::Emotion(Emotion::Sleeping)));
    }

    #[test]
    fn engine_publishes_to_subscribers() {
        let mut engine = DecisionEngine::new(EngineConfig::default());
        let rx = engine.subscribe();
        assert!(rx.borrow().is_none());

        engine.observe(&person_at(0.8), Instant::now());
        let decision = (*rx.borrow()).unwrap();
        assert_eq!(decision.state, SymbolicState::Position(Position::Left));
        assert!(decision.subject.is_some());
    }

    #[test]
    fn set_mode_resets_state_and_publication() {
        let mut engine = DecisionEngine::new(EngineConfig::default());
        let rx = engine.subscribe();
        engine.observe(&person_at(0.2), Instant::now());
        engine.set_mode(PerceptionMode::Emotion);
        assert!(rx.borrow().is_none());
        assert_eq!(engine.state().position(), Position::NotVisible);

        let s = engine.observe(&happy(), Instant::now());
        assert_eq!(s, Some(SymbolicState::Emotion(Emotion::Happy)));
    }

    #[test]
    fn emotion_decision_carries_the_gesture() {
        let mut engine = DecisionEngine::new(EngineConfig::for_mode(PerceptionMode::Emotion));
        let rx = engine.subscribe();

        let s = engine.observe(&Observation::Hand(Gesture::OpenPalm), Instant::now());
        assert_eq!(s, Some(SymbolicState::Emotion(Emotion::Neutral)));
        assert_eq!((*rx.borrow()).and_then(|d| d.gesture), Some(Gesture::OpenPalm));

        engine.observe(&happy(), Instant::now());
        assert_eq!((*rx.borrow()).and_then(|d| d.gesture), None);
    }

    #[test]
    fn feed_sees_every_decision_in_order() {
        let mut engine = DecisionEngine::new(EngineConfig::for_mode(PerceptionMode::Emotion));
        let mut feed = engine.feed();
        let t0 = Instant::now();

        engine.observe(&happy(), t0);
        engine.observe(&happy(), t0 + Duration::from_secs(10));
        engine.observe(&happy(), t0 + Duration::from_secs(11));

        let states: Vec<_> = std::iter::from_fn(|| feed.try_recv().ok())
            .map(|d| d.state)
            .collect();
        assert_eq!(
            states,
            vec![
                SymbolicState::Emotion(Emotion::Happy),
                SymbolicState::Emotion(Emotion::Neutral),
                SymbolicState::Emotion(Emotion::Happy),
            ]
        );
    }

    #[test]
    fn remote_mode_maps_to_perception_mode() {
        assert_eq!(PerceptionMode::from(RemoteMode::Follow), PerceptionMode::Follow);
        assert_eq!(PerceptionMode::from(RemoteMode::Emotion), PerceptionMode::Emotion);
        assert_eq!(PerceptionMode::parse(" Emotion "), Some(PerceptionMode::Emotion));
    }
}

//! `cobot-perception` – Decision Engine.
//!
//! Reduces noisy per-frame inference output into one stable, discrete
//! [`SymbolicState`][cobot_types::SymbolicState] per cycle.
//!
//! # Modules
//!
//! - [`geometry`] – focus bounding boxes built from pose landmarks, the
//!   "too small to follow" test and coarse distance estimation.
//! - [`position`] – [`PositionBands`][position::PositionBands]: threshold
//!   bucketing of a horizontal centre into LEFT / CENTER / RIGHT under one
//!   explicit [`MirrorConvention`][position::MirrorConvention].
//! - [`emotion`] – feature extraction from blendshape scores and the ordered
//!   emotion decision tree.
//! - [`stabilizer`] – [`EmotionStabilizer`][stabilizer::EmotionStabilizer]:
//!   dwell locks and the neutral → sleeping transition.
//! - [`smoothing`] – [`Debouncer`][smoothing::Debouncer]: N-consecutive-frame
//!   confirmation before a value change is accepted.
//! - [`engine`] – the pure [`decide`][engine::decide] function and the
//!   stateful [`DecisionEngine`][engine::DecisionEngine] that publishes the
//!   latest state to any number of readers.

pub mod emotion;
pub mod engine;
pub mod geometry;
pub mod position;
pub mod smoothing;
pub mod stabilizer;

pub use emotion::{EmotionFeatures, EmotionThresholds};
pub use engine::{Decision, DecisionEngine, EngineConfig, EngineState, PerceptionMode, Subject, decide};
pub use position::{MirrorConvention, PositionBands};
pub use smoothing::Debouncer;
pub use stabilizer::{DwellTimes, EmotionStabilizer};

//! `cobot-runtime` – the perception loop.
//!
//! Samples frames on a fixed cadence, runs one inference at a time, feeds
//! the Decision Engine and pushes the resulting commands to the link.
//!
//! # Modules
//!
//! - [`frame`] – [`Frame`][frame::Frame] and the
//!   [`FrameSource`][frame::FrameSource] seam to the camera subsystem.
//! - [`inference`] – [`InferenceAdapter`][inference::InferenceAdapter]: the
//!   seam to the ML runtime, and [`PerceptionBackend`][inference::PerceptionBackend]
//!   which opens a camera/model pair per mode.
//! - [`analyzer`] – [`LatestFrameSlot`][analyzer::LatestFrameSlot] (keep only
//!   the newest frame) and the [`FrameAnalyzer`][analyzer::FrameAnalyzer]
//!   worker that owns the model and the Decision Engine.
//! - [`cadence`] – [`Cadence`][cadence::Cadence]: a periodic timer bound to a
//!   shutdown signal.
//! - [`pipeline`] – [`PerceptionPipeline`][pipeline::PerceptionPipeline]: the
//!   capture, analysis, heartbeat and reaction tasks for one mode, torn down
//!   together.
//! - [`sim`] – synthetic camera, scripted model and a recording command
//!   sink for dry runs without hardware.
//! - [`supervisor`] – [`PerceptionSupervisor`][supervisor::PerceptionSupervisor]:
//!   starts, stops and switches pipelines, including switches announced by
//!   the robot.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod analyzer;
pub mod cadence;
pub mod frame;
pub mod inference;
pub mod pipeline;
pub mod sim;
pub mod supervisor;
pub mod telemetry;

pub use analyzer::{FrameAnalyzer, LatestFrameSlot};
pub use cadence::Cadence;
pub use frame::{Frame, FrameSource};
pub use inference::{InferenceAdapter, PerceptionBackend};
pub use pipeline::{CommandSink, PerceptionPipeline, PipelineConfig};
pub use supervisor::PerceptionSupervisor;
pub use telemetry::{TracerProviderGuard, init_tracing};

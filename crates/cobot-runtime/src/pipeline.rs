//! [`PerceptionPipeline`] – one running perception mode.
//!
//! A pipeline owns every task of one mode and tears them down together:
//!
//! | Task | Follow | Emotion |
//! |---|---|---|
//! | capture | every 200 ms into the [`LatestFrameSlot`] | every 2000 ms |
//! | analyzer | one inference at a time, feeds the Decision Engine | same |
//! | heartbeat | every 1000 ms: movement command for the latest position, `Stop` when perception is stale | – |
//! | reaction | – | on each decision, in order: emotion command if it changed, `Greet` when an open palm appears |
//!
//! All outbound commands pass a [`CommandThrottle`] before reaching the
//! [`CommandSink`].
//!
//! Stopping is scoped: [`shutdown`][PerceptionPipeline::shutdown] (or
//! dropping the pipeline) cancels the timers, drains the analyzer and
//! releases the model.  A follow pipeline sends a final `Stop` on shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cobot_control::{CommandMapper, CommandThrottle, FollowGate, StalenessWatchdog};
use cobot_link::{EventBus, LinkManager, Topic};
use cobot_perception::{Decision, DecisionEngine, EngineConfig, PerceptionMode};
use cobot_types::{Command, EventPayload};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::analyzer::{FrameAnalyzer, LatestFrameSlot};
use crate::cadence::Cadence;
use crate::frame::FrameSource;
use crate::inference::InferenceAdapter;

const SOURCE: &str = "cobot-runtime::pipeline";

// ────────────────────────────────────────────────────────────────────────────
// Command sink
// ────────────────────────────────────────────────────────────────────────────

/// Where mapped commands go.  Implementations must not fail across this
/// boundary; `false` means the command was not delivered.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, command: Command) -> bool;
}

#[async_trait]
impl CommandSink for LinkManager {
    async fn send(&self, command: Command) -> bool {
        LinkManager::send(self, command).await
    }
}

struct Outbound {
    sink: Arc<dyn CommandSink>,
    throttle: CommandThrottle,
}

impl Outbound {
    async fn dispatch(&self, command: Command) -> bool {
        if !self.throttle.admit(&command) {
            return false;
        }
        self.sink.send(command).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Decision Engine settings; `mode` is overridden per pipeline.
    pub engine: EngineConfig,
    pub follow_capture: Duration,
    pub emotion_capture: Duration,
    /// Movement heartbeat period.
    pub heartbeat: Duration,
    /// Perception silence after which the heartbeat sends `Stop`.
    pub stale_after: Duration,
    pub commands_per_second: u32,
    pub gate: FollowGate,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            follow_capture: Duration::from_millis(200),
            emotion_capture: Duration::from_millis(2000),
            heartbeat: Duration::from_millis(1000),
            stale_after: Duration::from_secs(3),
            commands_per_second: 10,
            gate: FollowGate::default(),
        }
    }
}

impl PipelineConfig {
    pub fn capture_period(&self, mode: PerceptionMode) -> Duration {
        match mode {
            PerceptionMode::Follow => self.follow_capture,
            PerceptionMode::Emotion => self.emotion_capture,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PerceptionPipeline
// ────────────────────────────────────────────────────────────────────────────

pub struct PerceptionPipeline {
    mode: PerceptionMode,
    shutdown: watch::Sender<bool>,
    slot: Arc<LatestFrameSlot>,
    decisions: watch::Receiver<Option<Decision>>,
    outbound: Arc<Outbound>,
    tasks: Vec<JoinHandle<()>>,
}

impl PerceptionPipeline {
    /// Spawn every task for `mode`.  Must be called inside a Tokio runtime.
    pub fn start(
        config: &PipelineConfig,
        mode: PerceptionMode,
        source: Box<dyn FrameSource>,
        adapter: Box<dyn InferenceAdapter>,
        sink: Arc<dyn CommandSink>,
        bus: EventBus,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let slot = Arc::new(LatestFrameSlot::new());
        let outbound = Arc::new(Outbound {
            sink,
            throttle: CommandThrottle::per_second(config.commands_per_second),
        });

        let mut engine = DecisionEngine::new(EngineConfig {
            mode,
            ..config.engine
        });
        let decisions = engine.subscribe();
        let feed = (mode == PerceptionMode::Emotion).then(|| engine.feed());

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(capture_loop(
            source,
            Arc::clone(&slot),
            Cadence::new(config.capture_period(mode), shutdown_rx.clone()),
            bus.clone(),
        )));
        tasks.push(FrameAnalyzer::spawn(Arc::clone(&slot), adapter, engine, bus));

        match feed {
            Some(feed) => tasks.push(tokio::spawn(reaction_loop(
                feed,
                Arc::clone(&outbound),
                shutdown_rx,
            ))),
            None => tasks.push(tokio::spawn(heartbeat_loop(
                decisions.clone(),
                Arc::clone(&outbound),
                Cadence::new(config.heartbeat, shutdown_rx),
                CommandMapper::new(config.gate),
                StalenessWatchdog::new(config.stale_after),
            ))),
        }

        info!(%mode, capture_ms = config.capture_period(mode).as_millis() as u64, "perception pipeline started");
        Self {
            mode,
            shutdown,
            slot,
            decisions,
            outbound,
            tasks,
        }
    }

    pub fn mode(&self) -> PerceptionMode {
        self.mode
    }

    /// Latest decision, as published by the engine.
    pub fn subscribe(&self) -> watch::Receiver<Option<Decision>> {
        self.decisions.clone()
    }

    pub fn latest(&self) -> Option<Decision> {
        *self.decisions.borrow()
    }

    /// Frames superseded before the analyzer got to them.
    pub fn dropped_frames(&self) -> u64 {
        self.slot.dropped()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Stop every task and wait for them.  The model is closed by the
    /// analyzer on its way out.
    pub async fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        self.signal_stop();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await
                && e.is_panic()
            {
                error!(error = %e, "perception task panicked");
            }
        }
        if self.mode == PerceptionMode::Follow {
            self.outbound.dispatch(Command::Stop).await;
        }
        info!(mode = %self.mode, dropped_frames = self.slot.dropped(), "perception pipeline stopped");
    }

    fn signal_stop(&self) {
        self.shutdown.send_replace(true);
        self.slot.close();
    }
}

impl Drop for PerceptionPipeline {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            debug!(mode = %self.mode, "pipeline dropped while running, signalling tasks");
            self.signal_stop();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tasks
// ────────────────────────────────────────────────────────────────────────────

async fn capture_loop(
    mut source: Box<dyn FrameSource>,
    slot: Arc<LatestFrameSlot>,
    mut cadence: Cadence,
    bus: EventBus,
) {
    while cadence.tick().await {
        match source.capture() {
            Ok(frame) => {
                if slot.submit(frame) {
                    trace!("analyzer busy, previous frame superseded");
                }
            }
            Err(e) => {
                warn!(source = source.id(), error = %e, "frame capture failed");
                bus.emit(
                    Topic::Perception,
                    SOURCE,
                    EventPayload::PerceptionFault(e.to_string()),
                );
            }
        }
    }
    debug!(source = source.id(), "capture stopped");
}

async fn heartbeat_loop(
    mut decisions: watch::Receiver<Option<Decision>>,
    outbound: Arc<Outbound>,
    mut cadence: Cadence,
    mut mapper: CommandMapper,
    mut watchdog: StalenessWatchdog,
) {
    while cadence.tick().await {
        let latest = *decisions.borrow_and_update();
        let command = match latest {
            Some(decision) => {
                watchdog.feed(decision.at);
                mapper
                    .map_to_command(&decision.state, decision.subject.as_ref())
                    .unwrap_or(Command::Stop)
            }
            None => Command::Stop,
        };
        let command = watchdog.guard(command, Instant::now());
        outbound.dispatch(command).await;
    }
    debug!("heartbeat stopped");
}

/// Reacts to every decision in order, so a lock expiring into `Neutral`
/// re-arms the emotion trigger even when the next decision follows at once.
async fn reaction_loop(
    mut decisions: mpsc::Receiver<Decision>,
    outbound: Arc<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut mapper = CommandMapper::default();
    loop {
        let next = tokio::select! {
            decision = decisions.recv() => decision,
            _ = shutdown.changed() => None,
        };
        let Some(decision) = next else {
            break;
        };
        if *shutdown.borrow() {
            break;
        }
        if let Some(command) = mapper.map_to_command(&decision.state, None) {
            outbound.dispatch(command).await;
        }
        if let Some(command) = mapper.map_gesture(decision.gesture) {
            debug!(gesture = ?decision.gesture, "gesture reaction");
            outbound.dispatch(command).await;
        }
    }
    debug!("reaction stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CommandLog, Scene, ScriptedModel, SyntheticCamera, face, person_at};
    use cobot_types::{BlendshapeScores, Emotion, Gesture, Observation, Position, SymbolicState};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            follow_capture: Duration::from_millis(10),
            emotion_capture: Duration::from_millis(10),
            heartbeat: Duration::from_millis(30),
            commands_per_second: 1000,
            ..PipelineConfig::default()
        }
    }

    fn start(
        mode: PerceptionMode,
        camera: SyntheticCamera,
        scene: Observation,
        sink: Arc<CommandLog>,
        bus: EventBus,
    ) -> (PerceptionPipeline, Arc<AtomicBool>) {
        let model = ScriptedModel::new(Scene::new(scene));
        let closed = model.closed_flag();
        let pipeline = PerceptionPipeline::start(
            &fast_config(),
            mode,
            Box::new(camera),
            Box::new(model),
            sink,
            bus,
        );
        (pipeline, closed)
    }

    #[tokio::test]
    async fn follow_sends_heartbeat_and_final_stop() {
        let sink = Arc::new(CommandLog::default());
        let (mut pipeline, closed) = start(
            PerceptionMode::Follow,
            SyntheticCamera::default(),
            person_at(0.2),
            sink.clone(),
            EventBus::default(),
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(
            pipeline.latest().map(|d| d.state),
            Some(SymbolicState::Position(Position::Right))
        );
        pipeline.shutdown().await;

        let sent = sink.commands();
        let turning = sent.iter().filter(|c| **c == Command::ForwardRight).count();
        assert!(turning >= 3, "expected a heartbeat stream, got {sent:?}");
        assert_eq!(sent.last(), Some(&Command::Stop));
        assert!(closed.load(Ordering::SeqCst));
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn emotion_sends_reaction_once() {
        let sink = Arc::new(CommandLog::default());
        let (mut pipeline, _) = start(
            PerceptionMode::Emotion,
            SyntheticCamera::default(),
            face(&[("mouthSmileLeft", 0.8), ("mouthSmileRight", 0.8)]),
            sink.clone(),
            EventBus::default(),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        pipeline.shutdown().await;

        assert_eq!(sink.commands(), vec![Command::Happy]);
        assert_eq!(
            pipeline.latest().map(|d| d.state),
            Some(SymbolicState::Emotion(Emotion::Happy))
        );
    }

    #[tokio::test]
    async fn held_open_palm_is_greeted_once() {
        let sink = Arc::new(CommandLog::default());
        let smiling_with_palm = Observation::Face {
            scores: [("mouthSmileLeft", 0.8), ("mouthSmileRight", 0.8)]
                .into_iter()
                .collect::<BlendshapeScores>(),
            gesture: Some(Gesture::OpenPalm),
        };
        let (mut pipeline, _) = start(
            PerceptionMode::Emotion,
            SyntheticCamera::default(),
            smiling_with_palm,
            sink.clone(),
            EventBus::default(),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        pipeline.shutdown().await;

        assert_eq!(sink.commands(), vec![Command::Happy, Command::Greet]);
    }

    #[tokio::test]
    async fn reaction_sees_neutral_between_back_to_back_decisions() {
        let sink = Arc::new(CommandLog::default());
        let outbound = Arc::new(Outbound {
            sink: sink.clone(),
            throttle: CommandThrottle::per_second(1000),
        });
        let (tx, rx) = mpsc::channel(8);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let now = Instant::now();
        let decision = |emotion| Decision {
            state: SymbolicState::Emotion(emotion),
            subject: None,
            gesture: None,
            at: now,
        };

        // Queued before the loop runs: happy, lock expiry, happy again.
        for emotion in [Emotion::Happy, Emotion::Neutral, Emotion::Happy] {
            tx.send(decision(emotion)).await.unwrap();
        }
        let task = tokio::spawn(reaction_loop(rx, outbound, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.send_replace(true);
        task.await.unwrap();

        assert_eq!(sink.commands(), vec![Command::Happy, Command::Happy]);
    }

    #[tokio::test]
    async fn capture_failures_stop_the_robot() {
        let sink = Arc::new(CommandLog::default());
        let bus = EventBus::default();
        let mut faults = bus.subscribe_to(Topic::Perception);
        let (mut pipeline, _) = start(
            PerceptionMode::Follow,
            SyntheticCamera::failing("front"),
            person_at(0.5),
            sink.clone(),
            bus,
        );

        let fault = tokio::time::timeout(Duration::from_secs(1), faults.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(fault.payload, EventPayload::PerceptionFault(_)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        pipeline.shutdown().await;

        let sent = sink.commands();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(Command::is_stop), "got {sent:?}");
    }

    #[tokio::test]
    async fn dropping_pipeline_releases_model() {
        let (pipeline, closed) = start(
            PerceptionMode::Emotion,
            SyntheticCamera::default(),
            Observation::Nothing,
            Arc::new(CommandLog::default()),
            EventBus::default(),
        );
        drop(pipeline);

        for _ in 0..100 {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("model was not closed after drop");
    }

    #[test]
    fn capture_period_per_mode() {
        let config = PipelineConfig::default();
        assert_eq!(config.capture_period(PerceptionMode::Follow), Duration::from_millis(200));
        assert_eq!(config.capture_period(PerceptionMode::Emotion), Duration::from_millis(2000));
    }
}

//! Keep-latest frame analysis.
//!
//! Frames are never queued.  The capture timer drops each frame into a
//! [`LatestFrameSlot`]; if the previous frame has not been picked up yet it
//! is replaced and counted as dropped.  A single [`FrameAnalyzer`] worker
//! takes frames out one at a time, so at most one inference is in flight and
//! observations reach the Decision Engine in capture order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cobot_link::{EventBus, Topic};
use cobot_perception::DecisionEngine;
use cobot_types::{CobotError, EventPayload, Observation};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::frame::Frame;
use crate::inference::InferenceAdapter;

const SOURCE: &str = "cobot-runtime::analyzer";

#[derive(Default)]
struct SlotState {
    pending: Option<Frame>,
    closed: bool,
}

/// Single-frame mailbox between the capture timer and the analyzer.
#[derive(Default)]
pub struct LatestFrameSlot {
    state: Mutex<SlotState>,
    ready: Notify,
    dropped: AtomicU64,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Offer a frame.  Returns `true` when it superseded a frame that was
    /// still waiting.  Ignored once closed.
    pub fn submit(&self, frame: Frame) -> bool {
        let superseded = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.pending.replace(frame).is_some()
        };
        if superseded {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        superseded
    }

    /// Wait for the next frame.  `None` once the slot is closed.
    pub async fn take(&self) -> Option<Frame> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(frame) = state.pending.take() {
                    return Some(frame);
                }
            }
            self.ready.notified().await;
        }
    }

    /// Stop accepting frames, discard any pending one and wake the worker.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.pending = None;
        }
        self.ready.notify_one();
    }

    /// Frames replaced before they were analyzed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The analysis worker: owns the model and the Decision Engine.
pub struct FrameAnalyzer;

impl FrameAnalyzer {
    /// Spawn the worker.  It runs until `slot` is closed, then closes the
    /// model.
    ///
    /// Inference runs on the blocking pool.  A failed inference is logged,
    /// published as [`EventPayload::PerceptionFault`] and treated as
    /// [`Observation::Nothing`] for that cycle.
    pub fn spawn(
        slot: Arc<LatestFrameSlot>,
        adapter: Box<dyn InferenceAdapter>,
        mut engine: DecisionEngine,
        bus: EventBus,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut adapter = adapter;
            let mut last_state = None;

            while let Some(frame) = slot.take().await {
                let sequence = frame.sequence;
                let captured_at = frame.captured_at;

                let joined = tokio::task::spawn_blocking(move || {
                    let result = adapter.infer(&frame);
                    (adapter, result)
                })
                .await;
                let result = match joined {
                    Ok((returned, result)) => {
                        adapter = returned;
                        result
                    }
                    Err(e) => {
                        error!(error = %e, "inference task panicked, analyzer stopping");
                        bus.emit(
                            Topic::Perception,
                            SOURCE,
                            EventPayload::PerceptionFault(format!("inference task failed: {e}")),
                        );
                        return;
                    }
                };

                let observation = degrade(result, sequence, &bus);
                if let Some(state) = engine.observe(&observation, captured_at)
                    && last_state != Some(state)
                {
                    last_state = Some(state);
                    bus.emit(Topic::Perception, SOURCE, EventPayload::StateChanged(state));
                }
            }

            debug!("analyzer stopped, releasing model");
            adapter.close();
        })
    }
}

fn degrade(result: Result<Observation, CobotError>, sequence: u64, bus: &EventBus) -> Observation {
    match result {
        Ok(observation) => observation,
        Err(e) => {
            warn!(frame = sequence, error = %e, "inference failed, treating frame as empty");
            bus.emit(Topic::Perception, SOURCE, EventPayload::PerceptionFault(e.to_string()));
            Observation::Nothing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobot_perception::{EngineConfig, PerceptionMode};
    use cobot_types::{Position, SymbolicState};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct CountingModel {
        seen: Arc<Mutex<Vec<u64>>>,
        closed: Arc<AtomicBool>,
        fail: bool,
    }

    impl InferenceAdapter for CountingModel {
        fn infer(&mut self, frame: &Frame) -> Result<Observation, CobotError> {
            self.seen.lock().unwrap().push(frame.sequence);
            if self.fail {
                Err(CobotError::Inference("model threw".into()))
            } else {
                Ok(Observation::Nothing)
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn model(fail: bool) -> (CountingModel, Arc<Mutex<Vec<u64>>>, Arc<AtomicBool>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let m = CountingModel {
            seen: Arc::clone(&seen),
            closed: Arc::clone(&closed),
            fail,
        };
        (m, seen, closed)
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, 1, 1, vec![0; 4])
    }

    #[test]
    fn submit_replaces_pending_frame() {
        let slot = LatestFrameSlot::new();
        assert!(!slot.submit(frame(1)));
        assert!(slot.submit(frame(2)));
        assert_eq!(slot.dropped(), 1);
    }

    #[tokio::test]
    async fn take_returns_newest_frame() {
        let slot = LatestFrameSlot::new();
        slot.submit(frame(1));
        slot.submit(frame(2));
        assert_eq!(slot.take().await.map(|f| f.sequence), Some(2));
    }

    #[tokio::test]
    async fn close_wakes_waiting_taker() {
        let slot = Arc::new(LatestFrameSlot::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.take().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        slot.close();
        assert!(waiter.await.unwrap().is_none());
        assert!(!slot.submit(frame(9)));
    }

    #[tokio::test]
    async fn two_requests_before_inference_run_once() {
        let slot = Arc::new(LatestFrameSlot::new());
        let (m, seen, closed) = model(false);
        let engine = DecisionEngine::new(EngineConfig::for_mode(PerceptionMode::Follow));

        slot.submit(frame(1));
        slot.submit(frame(2));
        let worker = FrameAnalyzer::spawn(Arc::clone(&slot), Box::new(m), engine, EventBus::default());

        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec![2]);

        slot.close();
        worker.await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn inference_error_degrades_to_nothing() {
        let slot = Arc::new(LatestFrameSlot::new());
        let (m, _, _) = model(true);
        let engine = DecisionEngine::new(EngineConfig::for_mode(PerceptionMode::Follow));
        let decisions = engine.subscribe();
        let bus = EventBus::default();
        let mut faults = bus.subscribe_to(Topic::Perception);

        let worker = FrameAnalyzer::spawn(Arc::clone(&slot), Box::new(m), engine, bus.clone());
        slot.submit(frame(1));

        let fault = tokio::time::timeout(Duration::from_secs(1), faults.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(fault.payload, EventPayload::PerceptionFault(_)));

        let mut decisions = decisions;
        tokio::time::timeout(Duration::from_secs(1), decisions.changed())
            .await
            .unwrap()
            .unwrap();
        let state = decisions.borrow().map(|d| d.state);
        assert_eq!(state, Some(SymbolicState::Position(Position::NotVisible)));

        slot.close();
        worker.await.unwrap();
    }
}

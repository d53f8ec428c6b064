//! [`PerceptionSupervisor`] – owns at most one running [`PerceptionPipeline`].
//!
//! Starting a mode always tears the previous pipeline down first, so two
//! modes never share the camera or the model.  When auto-switch is enabled
//! the supervisor also follows mode changes announced by the robot
//! (`-AON` / `-AFF`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cobot_link::EventBus;
use cobot_perception::{Decision, PerceptionMode};
use cobot_types::{CobotError, RemoteMode};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::inference::PerceptionBackend;
use crate::pipeline::{CommandSink, PerceptionPipeline, PipelineConfig};

struct Inner {
    config: PipelineConfig,
    backend: Arc<dyn PerceptionBackend>,
    sink: Arc<dyn CommandSink>,
    bus: EventBus,
    auto_switch: AtomicBool,
    current: Mutex<Option<PerceptionPipeline>>,
}

/// Cheap to clone; clones control the same pipeline.
#[derive(Clone)]
pub struct PerceptionSupervisor {
    inner: Arc<Inner>,
}

impl PerceptionSupervisor {
    /// Auto-switch starts enabled.
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn PerceptionBackend>,
        sink: Arc<dyn CommandSink>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                sink,
                bus,
                auto_switch: AtomicBool::new(true),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Run `mode`, replacing whatever was running.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports when opening the camera or the model.
    /// The previous pipeline has already been stopped at that point, so
    /// perception is left idle.
    pub async fn start(&self, mode: PerceptionMode) -> Result<(), CobotError> {
        let mut current = self.inner.current.lock().await;
        if let Some(mut previous) = current.take() {
            debug!(from = %previous.mode(), to = %mode, "replacing perception pipeline");
            previous.shutdown().await;
        }

        let (source, adapter) = self.inner.backend.open(mode).inspect_err(|e| {
            warn!(%mode, error = %e, "could not open perception backend");
        })?;
        *current = Some(PerceptionPipeline::start(
            &self.inner.config,
            mode,
            source,
            adapter,
            Arc::clone(&self.inner.sink),
            self.inner.bus.clone(),
        ));
        Ok(())
    }

    /// Stop the running pipeline.  Returns `false` when nothing was running.
    pub async fn stop(&self) -> bool {
        let mut current = self.inner.current.lock().await;
        match current.take() {
            Some(mut pipeline) => {
                pipeline.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub async fn mode(&self) -> Option<PerceptionMode> {
        self.inner.current.lock().await.as_ref().map(PerceptionPipeline::mode)
    }

    pub async fn latest(&self) -> Option<Decision> {
        self.inner.current.lock().await.as_ref().and_then(PerceptionPipeline::latest)
    }

    pub async fn dropped_frames(&self) -> u64 {
        self.inner
            .current
            .lock()
            .await
            .as_ref()
            .map_or(0, PerceptionPipeline::dropped_frames)
    }

    pub fn auto_switch(&self) -> bool {
        self.inner.auto_switch.load(Ordering::Relaxed)
    }

    pub fn set_auto_switch(&self, enabled: bool) {
        self.inner.auto_switch.store(enabled, Ordering::Relaxed);
        info!(enabled, "remote mode switching");
    }

    /// React to a mode announced by the robot.  Returns `true` when a
    /// different pipeline was started.
    ///
    /// # Errors
    ///
    /// See [`start`][Self::start].
    pub async fn apply_remote(&self, announced: RemoteMode) -> Result<bool, CobotError> {
        if !self.auto_switch() {
            debug!(%announced, "remote mode ignored, auto-switch is off");
            return Ok(false);
        }
        let target = PerceptionMode::from(announced);
        if self.mode().await == Some(target) {
            return Ok(false);
        }
        info!(%announced, "robot switched mode");
        self.start(target).await?;
        Ok(true)
    }

    /// Follow mode announcements until the sender goes away.
    pub fn follow_remote(&self, mut modes: watch::Receiver<Option<RemoteMode>>) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            while modes.changed().await.is_ok() {
                let announced = *modes.borrow_and_update();
                if let Some(announced) = announced
                    && let Err(e) = supervisor.apply_remote(announced).await
                {
                    warn!(%announced, error = %e, "could not follow remote mode");
                }
            }
            debug!("remote mode feed closed");
        })
    }
}

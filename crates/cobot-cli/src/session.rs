//! One interactive session: a simulated robot, the link to it and the
//! perception supervisor, all driven from the REPL thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cobot_link::{EventBus, LinkManager, PermissionSet, SimPeripheral, Topic};
use cobot_perception::{MirrorConvention, PerceptionMode};
use cobot_runtime::PerceptionSupervisor;
use cobot_runtime::sim::{Scene, ScriptedBackend, face, person_at};
use cobot_types::{CobotError, Command, EventPayload, Gesture, Observation};
use serde_json::json;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, mask_address};

const SOURCE: &str = "cobot-cli";

/// Scene names accepted by `/see`.
pub const SCENES: [&str; 10] = [
    "left", "center", "right", "none", "neutral", "happy", "sad", "angry", "surprised", "wave",
];

/// What the simulated camera sees for `name`, from the robot's point of
/// view.  `None` for unknown names.
pub fn scene_for(name: &str, mirror: MirrorConvention) -> Option<Observation> {
    // Image x of a person standing to the robot's left.
    let left_x = match mirror {
        MirrorConvention::Mirrored => 0.8,
        MirrorConvention::Direct => 0.2,
    };
    let observation = match name.trim().to_ascii_lowercase().as_str() {
        "left" => person_at(left_x),
        "right" => person_at(1.0 - left_x),
        "center" | "centre" => person_at(0.5),
        "none" | "nobody" => Observation::Nothing,
        "neutral" => face(&[]),
        "happy" => face(&[("mouthSmileLeft", 0.6), ("mouthSmileRight", 0.6)]),
        "angry" => face(&[("eyeSquintLeft", 0.5), ("eyeSquintRight", 0.5)]),
        "surprised" => face(&[("jawOpen", 0.5)]),
        "sad" => face(&[("mouthShrugLower", 0.8)]),
        "wave" => Observation::Hand(Gesture::OpenPalm),
        _ => return None,
    };
    Some(observation)
}

pub struct Session {
    runtime: Handle,
    config: Config,
    bus: EventBus,
    peripheral: SimPeripheral,
    link: Arc<LinkManager>,
    backend: Arc<ScriptedBackend>,
    supervisor: PerceptionSupervisor,
    remote: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl Session {
    /// # Errors
    ///
    /// [`CobotError::Config`] when the configuration does not translate
    /// into runtime settings.
    pub fn new(config: Config, runtime: Handle) -> Result<Self, CobotError> {
        let pipeline = config.pipeline_config()?;
        config.initial_mode()?;

        let bus = EventBus::default();
        let peripheral = SimPeripheral::new();
        peripheral.echo_mode();
        let link = Arc::new(LinkManager::new(
            config.link_config(),
            Arc::new(peripheral.clone()),
            Arc::new(PermissionSet::all()),
            bus.clone(),
        ));
        let backend = Arc::new(ScriptedBackend::new(Scene::default()));
        let supervisor = PerceptionSupervisor::new(pipeline, backend.clone(), link.clone(), bus.clone());
        supervisor.set_auto_switch(config.auto_switch);

        let remote = {
            let _ctx = runtime.enter();
            supervisor.follow_remote(link.subscribe_mode())
        };

        Ok(Self {
            runtime,
            config,
            bus,
            peripheral,
            link,
            backend,
            supervisor,
            remote: Mutex::new(Some(remote)),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Connect, push the configured speed and start the configured mode.
    pub fn connect(&self) -> Result<(), CobotError> {
        self.runtime.block_on(async {
            self.link.connect().await?;
            self.link.send(Command::speed(i32::from(self.config.speed))).await;
            if self.supervisor.mode().await.is_none() {
                self.supervisor.start(self.config.initial_mode()?).await?;
            }
            Ok::<_, CobotError>(())
        })
    }

    pub fn disconnect(&self) {
        self.runtime.block_on(async {
            self.supervisor.stop().await;
            self.link.disconnect().await;
        });
    }

    /// Start `mode` locally and tell the robot.
    pub fn switch(&self, mode: PerceptionMode) -> Result<(), CobotError> {
        self.runtime.block_on(async {
            self.supervisor.start(mode).await?;
            let announce = match mode {
                PerceptionMode::Follow => Command::AutoOn,
                PerceptionMode::Emotion => Command::AutoOff,
            };
            self.link.send(announce).await;
            Ok::<_, CobotError>(())
        })
    }

    /// Stop perception, then the motors.
    pub fn stop(&self) -> bool {
        self.runtime.block_on(async {
            self.supervisor.stop().await;
            self.link.send(Command::Stop).await
        })
    }

    pub fn send(&self, command: Command) -> bool {
        self.runtime.block_on(self.link.send(command))
    }

    pub fn set_auto_switch(&self, enabled: bool) {
        self.supervisor.set_auto_switch(enabled);
    }

    pub fn see(&self, observation: Observation) {
        self.backend.scene().set(observation);
    }

    /// Simulate the robot going out of range.
    pub fn drop_link(&self) {
        self.peripheral.drop_connection();
    }

    /// Stop everything and raise an alert.  Safe to call from any thread
    /// that is not a runtime worker.
    pub fn emergency_stop(&self, reason: &str) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(reason, "emergency stop");
        let stopped = self.stop();
        self.bus.emit(
            Topic::Alerts,
            SOURCE,
            EventPayload::Alert(format!("EMERGENCY_STOP: {reason}")),
        );
        info!(stop_delivered = stopped, "alert published");
    }

    /// Tear down background tasks and the link.
    pub fn close(&self) {
        if let Ok(mut remote) = self.remote.lock()
            && let Some(task) = remote.take()
        {
            task.abort();
        }
        self.disconnect();
    }

    pub fn status(&self) -> Status {
        self.runtime.block_on(async {
            Status {
                peer: mask_address(&self.link.config().peer_address),
                link: self.link.state().to_string(),
                mode: self.supervisor.mode().await.map(|m| m.to_string()),
                auto_switch: self.supervisor.auto_switch(),
                state: self.supervisor.latest().await.map(|d| d.state.to_string()),
                dropped_frames: self.supervisor.dropped_frames().await,
                last_received: self.link.last_received(),
                writes: self.peripheral.writes().len(),
            }
        })
    }
}

/// Snapshot printed by `/status`.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub peer: String,
    pub link: String,
    pub mode: Option<String>,
    pub auto_switch: bool,
    pub state: Option<String>,
    pub dropped_frames: u64,
    pub last_received: Option<String>,
    pub writes: usize,
}

impl Status {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "peer": self.peer,
            "link": self.link,
            "mode": self.mode,
            "auto_switch": self.auto_switch,
            "state": self.state,
            "dropped_frames": self.dropped_frames,
            "last_received": self.last_received,
            "writes": self.writes,
        })
    }
}

//! [`LinkManager`] – BLE connection state machine.
//!
//! ```text
//!  Idle ──connect──▶ Connecting ──ok──▶ Connected ──disconnect──▶ Disconnected
//!                        │                  │                          │
//!                        └──fail──▶ Error ◀─┘ (unexpected drop)        │
//!                                     │                                │
//!                                     └──────── connect / retry ◀──────┘
//! ```
//!
//! The manager is the only writer of [`ConnectionState`]; everyone else
//! observes it through [`LinkManager::subscribe_state`].  Nothing here
//! reconnects on its own: after an error or a drop the caller decides when
//! to retry.
//!
//! Command writes are serialized through one async mutex, so two callers can
//! never interleave bytes on the characteristic.  `send` never returns an
//! error; failures are logged and published on [`Topic::Commands`].

use std::sync::{Arc, Mutex};

use cobot_types::{CobotError, Command, ConnectionState, EventPayload, RemoteMode};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Topic};
use crate::permission::{Permission, PermissionGate};
use crate::transport::{CHARACTERISTIC_UUID, DEFAULT_PEER_ADDRESS, GattTransport, SERVICE_UUID, resolve};

const SOURCE: &str = "cobot-link::manager";

/// Where and what to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub peer_address: String,
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            peer_address: DEFAULT_PEER_ADDRESS.to_string(),
            service: SERVICE_UUID,
            characteristic: CHARACTERISTIC_UUID,
        }
    }
}

/// State shared with the notification reader task.
struct Shared {
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    received: watch::Sender<Option<String>>,
    mode: watch::Sender<Option<RemoteMode>>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            match &next {
                ConnectionState::Error(reason) => warn!(from = %previous, %reason, "link error"),
                _ => info!(from = %previous, to = %next, "link state changed"),
            }
        }
        self.bus.emit(Topic::Link, SOURCE, EventPayload::LinkState(next));
    }

    fn on_notify(&self, bytes: &[u8]) {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(e) => {
                warn!(len = bytes.len(), error = %e, "dropping malformed notification");
                return;
            }
        };
        debug!(text = %text.trim_end(), "notification received");
        self.received.send_replace(Some(text.clone()));

        if let Some(mode) = RemoteMode::detect(&text) {
            info!(%mode, "robot announced mode");
            self.mode.send_replace(Some(mode));
            self.bus.emit(Topic::Link, SOURCE, EventPayload::ModeChanged(mode));
        }
        self.bus.emit(Topic::Link, SOURCE, EventPayload::Received(text));
    }

    /// Unexpected loss of a live link.
    fn drop_link(&self, reason: &str) {
        if self.state.borrow().is_connected() {
            self.set_state(ConnectionState::Error(reason.to_string()));
        }
    }
}

/// Owns the connection lifecycle to one peripheral.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cobot_link::{EventBus, LinkConfig, LinkManager, PermissionSet, SimPeripheral};
/// use cobot_types::{Command, ConnectionState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let sim = SimPeripheral::new();
/// let link = LinkManager::new(
///     LinkConfig::default(),
///     Arc::new(sim.clone()),
///     Arc::new(PermissionSet::all()),
///     EventBus::default(),
/// );
///
/// link.connect().await.unwrap();
/// assert_eq!(link.state(), ConnectionState::Connected);
/// assert!(link.send(Command::Forward).await);
/// assert_eq!(sim.written_text(), vec!["FF"]);
/// # }
/// ```
pub struct LinkManager {
    config: LinkConfig,
    transport: Arc<dyn GattTransport>,
    permissions: Arc<dyn PermissionGate>,
    shared: Arc<Shared>,
    io: tokio::sync::Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl LinkManager {
    pub fn new(
        config: LinkConfig,
        transport: Arc<dyn GattTransport>,
        permissions: Arc<dyn PermissionGate>,
        bus: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (received, _) = watch::channel(None);
        let (mode, _) = watch::channel(None);
        Self {
            config,
            transport,
            permissions,
            shared: Arc::new(Shared {
                bus,
                state,
                received,
                mode,
            }),
            io: tokio::sync::Mutex::new(()),
            reader: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Verbatim text of the last inbound notification.
    pub fn last_received(&self) -> Option<String> {
        self.shared.received.borrow().clone()
    }

    pub fn subscribe_received(&self) -> watch::Receiver<Option<String>> {
        self.shared.received.subscribe()
    }

    /// Last mode the robot announced.
    pub fn subscribe_mode(&self) -> watch::Receiver<Option<RemoteMode>> {
        self.shared.mode.subscribe()
    }

    /// Connect to the configured peer.
    pub async fn connect(&self) -> Result<(), CobotError> {
        let address = self.config.peer_address.clone();
        self.connect_to(&address).await
    }

    /// Explicit retry after an error or a disconnect.
    pub async fn retry(&self) -> Result<(), CobotError> {
        self.connect().await
    }

    /// Connect to `address`, discover the command characteristic and enable
    /// notifications.
    ///
    /// A no-op when already connected.
    ///
    /// # Errors
    ///
    /// Every failure also leaves the manager in [`ConnectionState::Error`]:
    ///
    /// * [`CobotError::PermissionDenied`] – Bluetooth access not granted.
    /// * [`CobotError::Transport`] – the platform connect failed.
    /// * [`CobotError::Discovery`] – discovery failed, or the expected
    ///   service/characteristic is absent.
    #[instrument(skip(self))]
    pub async fn connect_to(&self, address: &str) -> Result<(), CobotError> {
        let _io = self.io.lock().await;
        if self.is_connected() {
            debug!("already connected");
            return Ok(());
        }

        self.shared.set_state(ConnectionState::Connecting);
        match self.establish(address).await {
            Ok(stream) => {
                // Connected must be visible before the reader can observe the
                // stream ending, or an early drop would be lost.
                self.shared.set_state(ConnectionState::Connected);
                self.spawn_reader(stream);
                Ok(())
            }
            Err(e) => {
                self.stop_reader();
                self.shared.set_state(ConnectionState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Connect, discover and enable notifications.  Returns the inbound
    /// notification stream on success.
    async fn establish(&self, address: &str) -> Result<BoxStream<'static, Vec<u8>>, CobotError> {
        self.permissions.check(Permission::BluetoothConnect)?;
        self.transport.connect(address).await?;

        let services = self.transport.discover().await;
        let services = match services {
            Ok(s) => s,
            Err(e) => {
                self.abandon().await;
                return Err(e);
            }
        };
        if !resolve(&services, self.config.service, self.config.characteristic) {
            self.abandon().await;
            return Err(CobotError::Discovery(format!(
                "characteristic {} not found in service {}",
                self.config.characteristic, self.config.service
            )));
        }

        let stream = self.transport.notifications().await;
        if let Err(e) = self
            .transport
            .enable_notifications(self.config.service, self.config.characteristic)
            .await
        {
            self.abandon().await;
            return Err(e);
        }
        Ok(stream)
    }

    fn spawn_reader(&self, mut stream: BoxStream<'static, Vec<u8>>) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            while let Some(bytes) = stream.next().await {
                shared.on_notify(&bytes);
            }
            shared.drop_link("notification stream closed");
        });
        self.replace_reader(Some(handle));
    }

    /// Best-effort transport teardown after a failed attempt.
    async fn abandon(&self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "disconnect after failed connect");
        }
    }

    /// Write one command.  Returns `true` when the bytes reached the
    /// transport.
    ///
    /// Never fails across this boundary: when not connected, or when the
    /// write is rejected, the failure is logged and published as
    /// [`EventPayload::CommandFailed`].
    #[instrument(skip(self))]
    pub async fn send(&self, command: Command) -> bool {
        let _io = self.io.lock().await;
        if !self.is_connected() {
            self.report_failure(&command, &CobotError::NotConnected);
            return false;
        }

        let payload = command.encode();
        match self
            .transport
            .write(self.config.service, self.config.characteristic, &payload)
            .await
        {
            Ok(()) => {
                debug!("command written");
                self.shared
                    .bus
                    .emit(Topic::Commands, SOURCE, EventPayload::CommandSent(command.to_string()));
                true
            }
            Err(e) => {
                self.report_failure(&command, &e);
                false
            }
        }
    }

    fn report_failure(&self, command: &Command, error: &CobotError) {
        warn!(%command, %error, "command not sent");
        self.shared.bus.emit(
            Topic::Commands,
            SOURCE,
            EventPayload::CommandFailed {
                command: command.to_string(),
                reason: error.to_string(),
            },
        );
    }

    /// Feed one inbound notification payload, e.g. from a platform callback.
    ///
    /// Each payload is treated as one complete message.  Invalid UTF-8 is
    /// logged and dropped.
    pub fn on_notify(&self, bytes: &[u8]) {
        self.shared.on_notify(bytes);
    }

    /// Report an unexpected drop from the platform.  Moves a live link to
    /// [`ConnectionState::Error`]; ignored otherwise.
    pub fn mark_dropped(&self, reason: &str) {
        self.stop_reader();
        self.shared.drop_link(reason);
    }

    /// Close the link on request.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let _io = self.io.lock().await;
        self.stop_reader();
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "transport disconnect failed");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    fn replace_reader(&self, next: Option<JoinHandle<()>>) {
        let previous = match self.reader.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        };
        if let Some(handle) = previous {
            handle.abort();
        }
    }

    fn stop_reader(&self) {
        self.replace_reader(None);
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

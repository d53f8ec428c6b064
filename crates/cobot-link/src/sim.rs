//! [`SimPeripheral`] – in-process stand-in for the robot's BLE module.
//!
//! Records every payload written to it and can be scripted to fail the
//! connection, discovery or notification setup, leave the command
//! characteristic out of discovery, reject writes, or push notifications.  With mode echo enabled it answers the
//! auto-mode commands the way the firmware does, announcing `-AON` / `-AFF`
//! on the notification channel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use cobot_types::{CobotError, Command};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::transport::{CHARACTERISTIC_UUID, GattTransport, SERVICE_UUID, ServiceInfo};

#[derive(Debug, Default)]
struct Script {
    fail_connect: Option<String>,
    fail_discover: Option<String>,
    fail_write: Option<String>,
    fail_notifications: Option<String>,
    omit_characteristic: bool,
    echo_mode: bool,
}

#[derive(Debug, Default)]
struct Inner {
    script: Mutex<Script>,
    writes: Mutex<Vec<Vec<u8>>>,
    notifier: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scriptable simulated peripheral.  Clones share state, so a test can keep
/// a handle after giving one to the link manager.
#[derive(Debug, Clone, Default)]
pub struct SimPeripheral {
    inner: Arc<Inner>,
}

impl SimPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `connect` fails with `reason`.
    pub fn fail_connect(&self, reason: impl Into<String>) -> &Self {
        lock(&self.inner.script).fail_connect = Some(reason.into());
        self
    }

    /// Every subsequent `discover` fails with `reason`.
    pub fn fail_discover(&self, reason: impl Into<String>) -> &Self {
        lock(&self.inner.script).fail_discover = Some(reason.into());
        self
    }

    /// Every subsequent `enable_notifications` fails with `reason`.
    pub fn fail_notifications(&self, reason: impl Into<String>) -> &Self {
        lock(&self.inner.script).fail_notifications = Some(reason.into());
        self
    }

    /// Discovery reports the service without its command characteristic.
    pub fn omit_characteristic(&self) -> &Self {
        lock(&self.inner.script).omit_characteristic = true;
        self
    }

    /// Every subsequent `write` fails with `reason`.
    pub fn fail_writes(&self, reason: impl Into<String>) -> &Self {
        lock(&self.inner.script).fail_write = Some(reason.into());
        self
    }

    /// Answer `AO` / `AF` with `-AON` / `-AFF` notifications.
    pub fn echo_mode(&self) -> &Self {
        lock(&self.inner.script).echo_mode = true;
        self
    }

    /// Clear every scripted failure.
    pub fn heal(&self) -> &Self {
        let mut script = lock(&self.inner.script);
        script.fail_connect = None;
        script.fail_discover = None;
        script.fail_write = None;
        script.fail_notifications = None;
        script.omit_characteristic = false;
        self
    }

    /// Push one notification.  Returns `false` when nobody is listening.
    pub fn notify(&self, payload: impl Into<Vec<u8>>) -> bool {
        match lock(&self.inner.notifier).as_ref() {
            Some(tx) => tx.send(payload.into()).is_ok(),
            None => false,
        }
    }

    /// Simulate the peer vanishing: the notification stream ends.
    pub fn drop_connection(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        lock(&self.inner.notifier).take();
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.inner.writes).clone()
    }

    /// Writes decoded as text with the line terminator stripped.
    pub fn written_text(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).trim_end_matches("\r\n").to_string())
            .collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.inner.writes).clear();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    fn echo(&self, payload: &[u8]) {
        if !lock(&self.inner.script).echo_mode {
            return;
        }
        if payload == Command::AutoOn.encode().as_slice() {
            self.notify(b"-AON\r\n".to_vec());
        } else if payload == Command::AutoOff.encode().as_slice() {
            self.notify(b"-AFF\r\n".to_vec());
        }
    }
}

#[async_trait]
impl GattTransport for SimPeripheral {
    async fn connect(&self, address: &str) -> Result<(), CobotError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = lock(&self.inner.script).fail_connect.clone() {
            return Err(CobotError::Transport(reason));
        }
        debug!(peer = %address, "sim peripheral connected");
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<ServiceInfo>, CobotError> {
        let script = lock(&self.inner.script);
        if let Some(reason) = script.fail_discover.clone() {
            return Err(CobotError::Discovery(reason));
        }
        let characteristics = if script.omit_characteristic {
            Vec::new()
        } else {
            vec![CHARACTERISTIC_UUID]
        };
        Ok(vec![ServiceInfo::new(SERVICE_UUID, characteristics)])
    }

    async fn enable_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<(), CobotError> {
        if let Some(reason) = lock(&self.inner.script).fail_notifications.clone() {
            return Err(CobotError::Transport(reason));
        }
        if service != SERVICE_UUID || characteristic != CHARACTERISTIC_UUID {
            return Err(CobotError::Discovery(format!("unknown characteristic {characteristic}")));
        }
        Ok(())
    }

    async fn write(&self, _service: Uuid, characteristic: Uuid, payload: &[u8]) -> Result<(), CobotError> {
        if !self.is_connected() {
            return Err(CobotError::NotConnected);
        }
        if let Some(reason) = lock(&self.inner.script).fail_write.clone() {
            return Err(CobotError::Transport(reason));
        }
        if characteristic != CHARACTERISTIC_UUID {
            return Err(CobotError::Transport(format!("unknown characteristic {characteristic}")));
        }
        lock(&self.inner.writes).push(payload.to_vec());
        self.echo(payload);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CobotError> {
        self.drop_connection();
        Ok(())
    }

    async fn notifications(&self) -> BoxStream<'static, Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.inner.notifier) = Some(tx);
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|bytes| (bytes, rx)) }).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_writes_while_connected() {
        let sim = SimPeripheral::new();
        assert!(
            sim.write(SERVICE_UUID, CHARACTERISTIC_UUID, b"FF\r\n")
                .await
                .is_err()
        );
        sim.connect("sim").await.unwrap();
        sim.write(SERVICE_UUID, CHARACTERISTIC_UUID, b"FF\r\n").await.unwrap();
        assert_eq!(sim.written_text(), vec!["FF"]);
    }

    #[tokio::test]
    async fn omitted_characteristic_is_missing_from_discovery() {
        let sim = SimPeripheral::new();
        sim.omit_characteristic();
        let services = sim.discover().await.unwrap();
        assert!(!services[0].has_characteristic(CHARACTERISTIC_UUID));
    }

    #[tokio::test]
    async fn notifications_flow_until_drop() {
        let sim = SimPeripheral::new();
        sim.connect("sim").await.unwrap();
        let mut stream = sim.notifications().await;
        assert!(sim.notify(b"hello".to_vec()));
        assert_eq!(stream.next().await, Some(b"hello".to_vec()));
        sim.drop_connection();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn echo_announces_mode() {
        let sim = SimPeripheral::new();
        sim.echo_mode();
        sim.connect("sim").await.unwrap();
        let mut stream = sim.notifications().await;
        sim.write(SERVICE_UUID, CHARACTERISTIC_UUID, &Command::AutoOn.encode())
            .await
            .unwrap();
        assert_eq!(stream.next().await, Some(b"-AON\r\n".to_vec()));
    }
}

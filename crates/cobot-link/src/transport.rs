//! The GATT transport seam.
//!
//! The link manager never talks to a Bluetooth stack directly.  It drives a
//! [`GattTransport`], which the platform supplies (or [`SimPeripheral`] in
//! tests and the CLI).
//!
//! The robot exposes one serial-style service (`FFE0`) with one
//! characteristic (`FFE1`) used for both command writes and inbound
//! notifications.  UUIDs are compared by value, so the upper/lower-case forms
//! reported by different platforms match.
//!
//! [`SimPeripheral`]: crate::sim::SimPeripheral

use async_trait::async_trait;
use cobot_types::CobotError;
use futures_util::stream::BoxStream;
use uuid::Uuid;

/// Serial service exposed by the robot's BLE module.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Read/write/notify characteristic inside [`SERVICE_UUID`].
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration Descriptor used to enable
/// notifications.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Hardware address of the paired robot.
pub const DEFAULT_PEER_ADDRESS: &str = "3C:A3:08:90:7D:62";

/// One discovered GATT service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl ServiceInfo {
    pub fn new(uuid: Uuid, characteristics: Vec<Uuid>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    pub fn has_characteristic(&self, characteristic: Uuid) -> bool {
        self.characteristics.contains(&characteristic)
    }
}

/// `true` when `services` contains `service` carrying `characteristic`.
pub fn resolve(services: &[ServiceInfo], service: Uuid, characteristic: Uuid) -> bool {
    services
        .iter()
        .any(|s| s.uuid == service && s.has_characteristic(characteristic))
}

/// Platform GATT client.
///
/// # Contract
///
/// * `connect` – open a connection to the peer at `address`.
/// * `discover` – list the services and characteristics of the connected
///   peer.
/// * `enable_notifications` – write the CCCD of `characteristic` so the peer
///   starts notifying.
/// * `write` – write one payload to `characteristic`.
/// * `notifications` – the stream of inbound notification payloads; it ends
///   when the connection goes away.
#[async_trait]
pub trait GattTransport: Send + Sync {
    async fn connect(&self, address: &str) -> Result<(), CobotError>;

    async fn discover(&self) -> Result<Vec<ServiceInfo>, CobotError>;

    async fn enable_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<(), CobotError>;

    async fn write(&self, service: Uuid, characteristic: Uuid, payload: &[u8]) -> Result<(), CobotError>;

    async fn disconnect(&self) -> Result<(), CobotError>;

    async fn notifications(&self) -> BoxStream<'static, Vec<u8>>;
}

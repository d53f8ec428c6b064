//! `cobot-link` – BLE link to the robot.
//!
//! Owns the connection lifecycle to one fixed peripheral and exposes a
//! send/receive contract that does not fail across its public boundary:
//! every failure ends in a logged state transition or a bus event.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe [`EventBus`][bus::EventBus] on
//!   Tokio broadcast channels.
//! - [`transport`] – [`GattTransport`][transport::GattTransport]: the seam to
//!   the platform GATT client, plus the fixed service and characteristic
//!   UUIDs.
//! - [`permission`] – [`PermissionGate`][permission::PermissionGate]: the
//!   precondition checked before any connection attempt.
//! - [`manager`] – [`LinkManager`][manager::LinkManager]: the connection state
//!   machine, serialized command writes and inbound notification decoding.
//! - [`sim`] – [`SimPeripheral`][sim::SimPeripheral]: an in-process
//!   peripheral that records writes and can be scripted to misbehave.

pub mod bus;
pub mod manager;
pub mod permission;
pub mod sim;
pub mod transport;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use manager::{LinkConfig, LinkManager};
pub use permission::{Permission, PermissionGate, PermissionSet};
pub use sim::SimPeripheral;
pub use transport::{GattTransport, ServiceInfo};

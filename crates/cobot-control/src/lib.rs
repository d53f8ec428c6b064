//! `cobot-control` – Command Mapper.
//!
//! Turns the Decision Engine's symbolic state into wire [`Command`]s and
//! keeps the outbound stream sane.
//!
//! # Modules
//!
//! - [`mapper`] – [`CommandMapper`][mapper::CommandMapper]: movement heartbeat
//!   mapping behind a [`FollowGate`][mapper::FollowGate], and edge-triggered
//!   emotion commands de-duplicated against the last one sent.
//! - [`throttle`] – [`CommandThrottle`][throttle::CommandThrottle]: caps
//!   outbound commands per second; `Stop` always passes.
//! - [`watchdog`] – [`StalenessWatchdog`][watchdog::StalenessWatchdog]:
//!   forces `Stop` into the heartbeat when perception goes quiet.
//!
//! [`Command`]: cobot_types::Command

pub mod mapper;
pub mod throttle;
pub mod watchdog;

pub use mapper::{CommandKind, CommandMapper, FollowGate};
pub use throttle::CommandThrottle;
pub use watchdog::{Freshness, StalenessWatchdog};

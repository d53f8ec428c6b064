//! Connection preconditions.
//!
//! Before a connection attempt the link manager asks a [`PermissionGate`]
//! whether the platform has granted Bluetooth access.  A denial aborts the
//! attempt immediately and is surfaced as an error state; nothing is retried
//! behind the caller's back.

use std::collections::HashSet;
use std::fmt;
use std::sync::RwLock;

use cobot_types::CobotError;

/// Platform permissions the link depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    BluetoothConnect,
    BluetoothScan,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::BluetoothConnect => write!(f, "BLUETOOTH_CONNECT"),
            Permission::BluetoothScan => write!(f, "BLUETOOTH_SCAN"),
        }
    }
}

/// Answers whether a [`Permission`] is currently held.
pub trait PermissionGate: Send + Sync {
    /// # Errors
    ///
    /// [`CobotError::PermissionDenied`] when `permission` is not granted.
    fn check(&self, permission: Permission) -> Result<(), CobotError>;
}

/// In-memory [`PermissionGate`] whose grants can change at runtime.
///
/// # Example
///
/// ```
/// use cobot_link::permission::{Permission, PermissionGate, PermissionSet};
///
/// let perms = PermissionSet::new();
/// assert!(perms.check(Permission::BluetoothConnect).is_err());
/// perms.grant(Permission::BluetoothConnect);
/// assert!(perms.check(Permission::BluetoothConnect).is_ok());
/// ```
#[derive(Debug, Default)]
pub struct PermissionSet {
    granted: RwLock<HashSet<Permission>>,
}

impl PermissionSet {
    /// Nothing granted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every permission granted.
    pub fn all() -> Self {
        let set = Self::new();
        set.grant(Permission::BluetoothConnect);
        set.grant(Permission::BluetoothScan);
        set
    }

    /// Duplicate grants are ignored.
    pub fn grant(&self, permission: Permission) {
        if let Ok(mut granted) = self.granted.write() {
            granted.insert(permission);
        }
    }

    /// No-op when `permission` was never granted.
    pub fn revoke(&self, permission: Permission) {
        if let Ok(mut granted) = self.granted.write() {
            granted.remove(&permission);
        }
    }
}

impl PermissionGate for PermissionSet {
    fn check(&self, permission: Permission) -> Result<(), CobotError> {
        let held = self
            .granted
            .read()
            .map(|g| g.contains(&permission))
            .unwrap_or(false);
        if held {
            Ok(())
        } else {
            Err(CobotError::PermissionDenied(permission.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ungranted_is_denied() {
        let perms = PermissionSet::new();
        let result = perms.check(Permission::BluetoothScan);
        assert_eq!(result, Err(CobotError::PermissionDenied("BLUETOOTH_SCAN".into())));
    }

    #[test]
    fn revoke_removes_grant() {
        let perms = PermissionSet::all();
        perms.revoke(Permission::BluetoothConnect);
        assert!(perms.check(Permission::BluetoothConnect).is_err());
        assert!(perms.check(Permission::BluetoothScan).is_ok());
    }

    #[test]
    fn revoke_unknown_is_noop() {
        let perms = PermissionSet::new();
        perms.revoke(Permission::BluetoothScan);
        assert!(perms.check(Permission::BluetoothScan).is_err());
    }
}

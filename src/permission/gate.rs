use std::fmt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::device::constants::SCOPED_BLUETOOTH_PERMISSION_VERSION;
use crate::error::PermissionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    BluetoothConnect,
    BluetoothScan,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Permission::BluetoothConnect => "BLUETOOTH_CONNECT",
            Permission::BluetoothScan => "BLUETOOTH_SCAN",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

/// The operating system's record of which permissions the application holds.
pub trait PermissionRegistry: Send + Sync {
    fn platform_version(&self) -> u32;
    fn check_permission(&self, permission: Permission) -> Result<PermissionState, PermissionError>;
}

/// Decides whether a scan may be started.
///
/// Nothing is cached: the user can revoke the permission at any time, so ask right before
/// every start.
pub struct PermissionGate<R> {
    registry: R,
}

impl<R: PermissionRegistry> PermissionGate<R> {
    pub fn new(registry: R) -> Self {
        PermissionGate { registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn is_scan_permission_granted(&self) -> bool {
        let version = self.registry.platform_version();
        if version < SCOPED_BLUETOOTH_PERMISSION_VERSION {
            debug!("Platform version {} grants Bluetooth access at install time", version);
            return true;
        }

        match self.registry.check_permission(Permission::BluetoothConnect) {
            Ok(PermissionState::Granted) => true,
            Ok(PermissionState::Denied) => {
                debug!("{} is not granted", Permission::BluetoothConnect);
                false
            },
            Err(err) => {
                warn!("Could not determine Bluetooth permission, assuming it is not granted: {}", err);
                false
            },
        }
    }
}

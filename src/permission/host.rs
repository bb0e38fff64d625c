use crate::config::types::PermissionConfig;
use crate::error::PermissionError;
use crate::permission::gate::{Permission, PermissionRegistry, PermissionState};

/// Permission registry for desktop hosts, described by the `permission` section of the config.
///
/// Desktop operating systems do not expose a runtime Bluetooth permission model of their own;
/// the default config reports platform version 0 so the gate always passes. Denied access that
/// the OS does enforce surfaces as a scan failure instead.
#[derive(Debug, Clone)]
pub struct HostPermissionRegistry {
    config: PermissionConfig,
}

impl HostPermissionRegistry {
    pub fn new(config: PermissionConfig) -> Self {
        HostPermissionRegistry { config }
    }
}

impl PermissionRegistry for HostPermissionRegistry {
    fn platform_version(&self) -> u32 {
        self.config.platform_version
    }

    fn check_permission(&self, permission: Permission) -> Result<PermissionState, PermissionError> {
        if self.config.granted.contains(&permission) {
            Ok(PermissionState::Granted)
        } else {
            Ok(PermissionState::Denied)
        }
    }
}

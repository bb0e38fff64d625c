use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{HEART_RATE_SERVICE, REPORT_DELAY};
use crate::device::types::{DeviceListFilter, ScanFilterSpec, ScanMode, ScanSettings};
use crate::error::DiscoveryError;
use crate::permission::Permission;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub scan_mode: ScanMode,
    pub legacy: bool,
    pub report_delay_ms: u64,
    pub use_hardware_batching: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            scan_mode: ScanMode::LowLatency,
            legacy: false,
            report_delay_ms: REPORT_DELAY,
            use_hardware_batching: true,
        }
    }
}

impl From<&ScanConfig> for ScanSettings {
    fn from(config: &ScanConfig) -> Self {
        ScanSettings {
            mode: config.scan_mode,
            legacy: config.legacy,
            report_delay: Duration::from_millis(config.report_delay_ms),
            use_hardware_batching: config.use_hardware_batching,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionConfig {
    /// Platform version (API level) reported to the permission gate.
    pub platform_version: u32,
    pub granted: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub service_uuid: String,
    pub scan: ScanConfig,
    /// Which discovered devices are listed.
    pub list: DeviceListFilter,
    pub permission: PermissionConfig,
}

impl Config {
    pub fn filter(&self) -> Result<ScanFilterSpec, DiscoveryError> {
        self.service_uuid.parse()
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings::from(&self.scan)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_uuid: HEART_RATE_SERVICE.to_string(),
            scan: ScanConfig::default(),
            list: DeviceListFilter::default(),
            permission: PermissionConfig::default(),
        }
    }
}

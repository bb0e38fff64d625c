use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{NEARBY_RSSI, REPORT_DELAY};
use crate::error::DiscoveryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Stable address of the device, used as its identity.
    pub id: String,
    pub name: Option<String>,
    /// Signal strength of the latest advertisement.
    pub rssi: Option<i16>,
    /// Strongest signal seen from the device during the scan.
    pub highest_rssi: Option<i16>,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Device { id: id.into(), name: None, rssi: None, highest_rssi: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self.highest_rssi = self.highest_rssi.max(Some(rssi));
        self
    }

    /// Folds a later sighting of the same device into this one. Returns true if anything changed.
    ///
    /// A sighting without a name (or signal strength) keeps the known one.
    pub fn update(&mut self, seen: Device) -> bool {
        let mut changed = false;

        if seen.name.is_some() && seen.name != self.name {
            self.name = seen.name;
            changed = true;
        }
        if seen.rssi.is_some() && seen.rssi != self.rssi {
            self.rssi = seen.rssi;
            changed = true;
        }

        let highest = self.highest_rssi.max(seen.highest_rssi).max(seen.rssi);
        if highest != self.highest_rssi {
            self.highest_rssi = highest;
            changed = true;
        }

        changed
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Restricts a scan to advertisements that carry one service UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilterSpec {
    pub service: Uuid,
}

impl ScanFilterSpec {
    pub fn new(service: Uuid) -> Self {
        ScanFilterSpec { service }
    }

    pub fn matches(&self, services: &[Uuid]) -> bool {
        services.contains(&self.service)
    }
}

impl FromStr for ScanFilterSpec {
    type Err = DiscoveryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let service = Uuid::parse_str(value.trim()).map_err(|source| DiscoveryError::InvalidServiceUuid {
            value: value.to_string(),
            source,
        })?;
        Ok(ScanFilterSpec { service })
    }
}

impl fmt::Display for ScanFilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.service)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Only accept legacy (BLE 4.x) advertisements.
    pub legacy: bool,
    /// Results are coalesced for this long before delivery. Zero delivers every result directly.
    pub report_delay: Duration,
    pub use_hardware_batching: bool,
}

impl ScanSettings {
    pub fn is_batching(&self) -> bool {
        !self.report_delay.is_zero()
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            mode: ScanMode::LowLatency,
            legacy: false,
            report_delay: Duration::from_millis(REPORT_DELAY),
            use_hardware_batching: true,
        }
    }
}

/// Reason reported by the platform scanner when a scan could not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    AlreadyStarted,
    ApplicationRegistrationFailed,
    InternalError,
    FeatureUnsupported,
    OutOfHardwareResources,
    ScanningTooFrequently,
    /// The operating system did not let the application use Bluetooth. Has no platform code.
    PermissionDenied,
    Unknown(i32),
}

impl ScanFailure {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ScanFailure::AlreadyStarted,
            2 => ScanFailure::ApplicationRegistrationFailed,
            3 => ScanFailure::InternalError,
            4 => ScanFailure::FeatureUnsupported,
            5 => ScanFailure::OutOfHardwareResources,
            6 => ScanFailure::ScanningTooFrequently,
            other => ScanFailure::Unknown(other),
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ScanFailure::AlreadyStarted => Some(1),
            ScanFailure::ApplicationRegistrationFailed => Some(2),
            ScanFailure::InternalError => Some(3),
            ScanFailure::FeatureUnsupported => Some(4),
            ScanFailure::OutOfHardwareResources => Some(5),
            ScanFailure::ScanningTooFrequently => Some(6),
            ScanFailure::PermissionDenied => None,
            ScanFailure::Unknown(code) => Some(*code),
        }
    }
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            ScanFailure::AlreadyStarted => "scan already started",
            ScanFailure::ApplicationRegistrationFailed => "scanner registration failed",
            ScanFailure::InternalError => "internal scanner error",
            ScanFailure::FeatureUnsupported => "scanning is not supported",
            ScanFailure::OutOfHardwareResources => "out of hardware resources",
            ScanFailure::ScanningTooFrequently => "scanning too frequently",
            ScanFailure::PermissionDenied => "not allowed to use Bluetooth",
            ScanFailure::Unknown(_) => "unknown scanner error",
        };

        match self.code() {
            Some(code) => write!(f, "{} (code {})", description, code),
            None => write!(f, "{}", description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started(ScanFilterSpec),
    ScanFailed(ScanFailure),
    /// Bluetooth went away during the scan. The device list has been cleared.
    BluetoothDisabled,
    Stopped,
}

/// Which of the discovered devices are shown to the user.
///
/// The scan itself is not affected; a device that starts matching later (for example because it
/// came closer) shows up from then on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceListFilter {
    /// Only devices whose strongest signal reached [`NEARBY_RSSI`].
    pub nearby_only: bool,
    /// Only devices whose advertised name starts with this.
    pub name_prefix: Option<String>,
}

impl DeviceListFilter {
    pub fn matches(&self, device: &Device) -> bool {
        if self.nearby_only && !device.highest_rssi.is_some_and(|rssi| rssi >= NEARBY_RSSI) {
            return false;
        }

        match &self.name_prefix {
            Some(prefix) => device.name.as_deref().is_some_and(|name| name.starts_with(prefix.as_str())),
            None => true,
        }
    }
}

/// Input from the device picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanViewEvent {
    Cancel,
    DeviceSelected(Device),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_parses_service_uuid() {
        let filter: ScanFilterSpec = "0000180d-0000-1000-8000-00805f9b34fb".parse().unwrap();
        assert_eq!(filter.service, Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb));
        assert!(filter.matches(&[Uuid::nil(), filter.service]));
        assert!(!filter.matches(&[Uuid::nil()]));
    }

    #[test]
    fn filter_rejects_garbage() {
        let err = "not-a-uuid".parse::<ScanFilterSpec>().unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidServiceUuid { .. }));
        assert!(err.to_string().contains("not-a-uuid"));
    }

    #[test]
    fn default_settings_request_low_latency_batching() {
        let settings = ScanSettings::default();
        assert_eq!(settings.mode, ScanMode::LowLatency);
        assert!(!settings.legacy);
        assert!(settings.use_hardware_batching);
        assert_eq!(settings.report_delay, Duration::from_millis(5000));
        assert!(settings.is_batching());
    }

    #[test]
    fn failure_codes() {
        for code in 1..=6 {
            assert_eq!(ScanFailure::from_code(code).code(), Some(code));
        }
        assert_eq!(ScanFailure::from_code(42), ScanFailure::Unknown(42));
        assert!(ScanFailure::InternalError.to_string().contains("code 3"));
        assert_eq!(ScanFailure::PermissionDenied.code(), None);
        assert!(!ScanFailure::PermissionDenied.to_string().contains("code"));
    }

    #[test]
    fn update_refreshes_name_and_signal() {
        let mut device = Device::new("A").with_rssi(-90);
        assert_eq!(device.highest_rssi, Some(-90));

        assert!(device.update(Device::new("A").with_name("HRM").with_rssi(-40)));
        assert_eq!(device.name.as_deref(), Some("HRM"));
        assert_eq!(device.rssi, Some(-40));
        assert_eq!(device.highest_rssi, Some(-40));

        // weaker and nameless: the name stays, the strongest signal is remembered
        assert!(device.update(Device::new("A").with_rssi(-70)));
        assert_eq!(device.name.as_deref(), Some("HRM"));
        assert_eq!(device.rssi, Some(-70));
        assert_eq!(device.highest_rssi, Some(-40));

        assert!(!device.update(Device::new("A").with_rssi(-70)));
        assert!(!device.update(Device::new("A")));
    }

    #[test]
    fn list_filter() {
        let near = Device::new("A").with_name("YX_1").with_rssi(-50);
        let far = Device::new("B").with_name("other").with_rssi(-51);
        let silent = Device::new("C");

        let all = DeviceListFilter::default();
        assert!(all.matches(&near) && all.matches(&far) && all.matches(&silent));

        let nearby = DeviceListFilter { nearby_only: true, name_prefix: None };
        assert!(nearby.matches(&near));
        assert!(!nearby.matches(&far));
        assert!(!nearby.matches(&silent));

        let named = DeviceListFilter { nearby_only: false, name_prefix: Some("YX_".to_string()) };
        assert!(named.matches(&near));
        assert!(!named.matches(&far));
        assert!(!named.matches(&silent));
    }

    #[test]
    fn device_display() {
        assert_eq!(Device::new("AA:BB").to_string(), "AA:BB");
        assert_eq!(Device::new("AA:BB").with_name("HRM").to_string(), "HRM (AA:BB)");
    }
}

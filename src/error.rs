use std::io;
use std::str::Utf8Error;
use thiserror::Error;

use crate::device::types::ScanFailure;
use crate::permission::Permission;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("The session is already scanning")]
    AlreadyScanning,

    #[error("Invalid service UUID {value:?}: {source}")]
    InvalidServiceUuid { value: String, source: uuid::Error },

    #[error("No Bluetooth adapter found")]
    NoAdapter,

    #[error("Not allowed to access Bluetooth")]
    PermissionDenied,

    #[error("Bluetooth was turned off")]
    BluetoothDisabled,

    #[error("Error communicating with the Bluetooth adapter (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Failed to query permission registry: {0}")]
    Query(String),

    #[error("Permission {0} is not known to this platform")]
    Unknown(Permission),
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to scan for devices: {source}")]
    DiscoveryError { #[from] source: DiscoveryError },

    #[error("Scan failed: {failure}")]
    ScanFailed { failure: ScanFailure },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn not_found_is_detected() {
        let err = ConfigError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.is_file_not_found_error());
        assert!(!ConfigError::NoConfigPath.is_file_not_found_error());
    }

    #[test]
    fn btleplug_errors_are_chained() {
        let err = DiscoveryError::from(btleplug::Error::PermissionDenied);
        assert!(err.source().is_some());

        let err = AppRunError::from(err);
        assert!(err.to_string().contains("Failed to scan for devices"));
    }

    #[test]
    fn errors_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DiscoveryError>();
        assert_send_sync::<ConfigError>();
    }
}

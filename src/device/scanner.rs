use std::fmt;
use std::sync::Arc;

use crate::device::types::{Device, ScanFailure, ScanFilterSpec, ScanSettings};
use crate::error::DiscoveryError;

/// Receives results of a running scan. Called from scanner threads or tasks.
pub trait ScanCallback: Send + Sync {
    fn on_scan_result(&self, device: Device);
    fn on_batch_scan_results(&self, devices: Vec<Device>);
    fn on_scan_failed(&self, failure: ScanFailure);
    /// Bluetooth was turned off or the adapter went away. No more results will arrive.
    fn on_bluetooth_disabled(&self);
}

/// The platform scanner. There is one per process, shared by every session through an `Arc`.
pub trait Scanner: Send + Sync {
    /// Starts scanning and returns without waiting for the scan to come up.
    ///
    /// Failures that happen after this returns are reported through
    /// [`ScanCallback::on_scan_failed`]. The scan runs until the returned registration is
    /// released or dropped.
    fn start_scan(
        &self,
        filter: &ScanFilterSpec,
        settings: &ScanSettings,
        callback: Arc<dyn ScanCallback>,
    ) -> Result<ScanRegistration, DiscoveryError>;
}

/// Ownership of a running scan. Releasing or dropping it stops the scan.
pub struct ScanRegistration {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl ScanRegistration {
    pub fn new<F>(stop: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        ScanRegistration { stop: Some(Box::new(stop)) }
    }

    pub fn release(mut self) {
        self.stop_now();
    }

    fn stop_now(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for ScanRegistration {
    fn drop(&mut self) {
        self.stop_now();
    }
}

impl fmt::Debug for ScanRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRegistration")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

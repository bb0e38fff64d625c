use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::scanner::{ScanCallback, ScanRegistration, Scanner};
use crate::device::types::{Device, ScanFailure, ScanFilterSpec, ScanSettings};
use crate::error::DiscoveryError;

struct MockScan {
    filter: ScanFilterSpec,
    settings: ScanSettings,
    callback: Arc<dyn ScanCallback>,
    active: Arc<AtomicBool>,
}

/// In-process scanner that delivers whatever it is told to.
///
/// Useful for tests, and for embedders whose platform scanner already calls back with results:
/// forward those callbacks to [`deliver`](Self::deliver) and friends.
#[derive(Default)]
pub struct MockScanner {
    scans: Mutex<Vec<MockScan>>,
    stops: Arc<AtomicUsize>,
    reject_next_start: AtomicBool,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn scans(&self) -> MutexGuard<'_, Vec<MockScan>> {
        self.scans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn latest_callback(&self) -> Option<Arc<dyn ScanCallback>> {
        self.scans().last().map(|scan| scan.callback.clone())
    }

    /// Makes the next `start_scan` fail with [`DiscoveryError::NoAdapter`].
    pub fn reject_next_start(&self) {
        self.reject_next_start.store(true, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.scans().len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.scans().last().is_some_and(|scan| scan.active.load(Ordering::SeqCst))
    }

    pub fn last_filter(&self) -> Option<ScanFilterSpec> {
        self.scans().last().map(|scan| scan.filter)
    }

    pub fn last_settings(&self) -> Option<ScanSettings> {
        self.scans().last().map(|scan| scan.settings)
    }

    /// Callback of the `index`th started scan, running or not.
    pub fn callback(&self, index: usize) -> Option<Arc<dyn ScanCallback>> {
        self.scans().get(index).map(|scan| scan.callback.clone())
    }

    // The callbacks are invoked without holding the scans lock.

    pub fn deliver(&self, device: Device) {
        if let Some(callback) = self.latest_callback() {
            callback.on_scan_result(device);
        }
    }

    pub fn deliver_batch(&self, devices: Vec<Device>) {
        if let Some(callback) = self.latest_callback() {
            callback.on_batch_scan_results(devices);
        }
    }

    pub fn fail(&self, failure: ScanFailure) {
        if let Some(callback) = self.latest_callback() {
            callback.on_scan_failed(failure);
        }
    }

    pub fn disable_bluetooth(&self) {
        if let Some(callback) = self.latest_callback() {
            callback.on_bluetooth_disabled();
        }
    }
}

impl Scanner for MockScanner {
    fn start_scan(
        &self,
        filter: &ScanFilterSpec,
        settings: &ScanSettings,
        callback: Arc<dyn ScanCallback>,
    ) -> Result<ScanRegistration, DiscoveryError> {
        if self.reject_next_start.swap(false, Ordering::SeqCst) {
            return Err(DiscoveryError::NoAdapter);
        }

        let active = Arc::new(AtomicBool::new(true));
        self.scans().push(MockScan {
            filter: *filter,
            settings: *settings,
            callback,
            active: active.clone(),
        });

        let stops = self.stops.clone();
        Ok(ScanRegistration::new(move || {
            active.store(false, Ordering::SeqCst);
            stops.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

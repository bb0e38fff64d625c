use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};

use crate::device::constants::SESSION_EVENT_CAPACITY;
use crate::device::holder::DeviceHolder;
use crate::device::scanner::{ScanCallback, ScanRegistration, Scanner};
use crate::device::state::{DiscoveryState, MergeSummary, Sighting};
use crate::device::types::{Device, ScanFailure, ScanFilterSpec, ScanSettings, ScanViewEvent, SessionEvent};
use crate::error::DiscoveryError;

#[derive(Debug)]
enum Phase {
    Idle,
    Scanning {
        scan_id: u64,
        // None while the scanner is still being started
        registration: Option<ScanRegistration>,
    },
}

impl Phase {
    // `None` accepts whichever scan is running
    fn accepts(&self, scan_id: Option<u64>) -> bool {
        match (self, scan_id) {
            (Phase::Idle, _) => false,
            (Phase::Scanning { .. }, None) => true,
            (Phase::Scanning { scan_id: current, .. }, Some(scan_id)) => *current == scan_id,
        }
    }
}

struct SessionShared {
    // Every merge and emission happens while holding this lock, which is what makes stop() final.
    phase: Mutex<Phase>,
    state: watch::Sender<DiscoveryState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn merge(&self, scan_id: Option<u64>, devices: Vec<Device>) -> MergeSummary {
        let phase = self.lock_phase();
        if !phase.accepts(scan_id) {
            debug!("Ignoring {} scan result(s) outside of an active scan", devices.len());
            return MergeSummary::default();
        }

        let mut summary = MergeSummary::default();
        self.state.send_if_modified(|state| {
            summary = state.merge(devices);
            if !summary.is_empty() {
                state.mark_emitted();
            }
            !summary.is_empty()
        });

        if summary.added > 0 {
            debug!("Discovered {} new device(s)", summary.added);
        }
        summary
    }

    fn bluetooth_disabled(&self, scan_id: Option<u64>) {
        let phase = self.lock_phase();
        if !phase.accepts(scan_id) {
            return;
        }

        warn!("Bluetooth was disabled, forgetting discovered devices");
        self.state.send_if_modified(|state| {
            let cleared = state.clear();
            if cleared {
                state.mark_emitted();
            }
            cleared
        });
        let _ = self.events.send(SessionEvent::BluetoothDisabled);
    }

    fn fail(&self, scan_id: Option<u64>, failure: ScanFailure) {
        let phase = self.lock_phase();
        if !phase.accepts(scan_id) {
            debug!("Ignoring scan failure outside of an active scan: {}", failure);
            return;
        }

        warn!("Scan failed: {}", failure);
        // no subscribers is fine
        let _ = self.events.send(SessionEvent::ScanFailed(failure));
    }
}

/// Callback handed to the scanner for a single scan.
///
/// Holds the session weakly so a scanner that keeps it around does not keep the session alive.
struct SessionCallback {
    shared: Weak<SessionShared>,
    scan_id: u64,
}

impl ScanCallback for SessionCallback {
    fn on_scan_result(&self, device: Device) {
        if let Some(shared) = self.shared.upgrade() {
            shared.merge(Some(self.scan_id), vec![device]);
        }
    }

    fn on_batch_scan_results(&self, devices: Vec<Device>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.merge(Some(self.scan_id), devices);
        }
    }

    fn on_scan_failed(&self, failure: ScanFailure) {
        if let Some(shared) = self.shared.upgrade() {
            shared.fail(Some(self.scan_id), failure);
        }
    }

    fn on_bluetooth_disabled(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.bluetooth_disabled(Some(self.scan_id));
        }
    }
}

/// Runs scans and folds their results into a deduplicated [`DiscoveryState`].
///
/// The caller checks [`crate::permission::PermissionGate`] before [`start`](Self::start); the
/// session does not check it again.
///
/// Observers get the latest state through [`subscribe`](Self::subscribe), which always holds a
/// value so a late subscriber sees the current device list. Failures and lifecycle changes are
/// published through [`events`](Self::events).
pub struct DeviceDiscoverySession {
    scanner: Arc<dyn Scanner>,
    holder: Arc<dyn DeviceHolder>,
    settings: ScanSettings,
    shared: Arc<SessionShared>,
    next_scan_id: AtomicU64,
}

impl DeviceDiscoverySession {
    pub fn new(scanner: Arc<dyn Scanner>, holder: Arc<dyn DeviceHolder>) -> Self {
        Self::with_settings(scanner, holder, ScanSettings::default())
    }

    pub fn with_settings(scanner: Arc<dyn Scanner>, holder: Arc<dyn DeviceHolder>, settings: ScanSettings) -> Self {
        let (state, _) = watch::channel(DiscoveryState::new());
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        DeviceDiscoverySession {
            scanner,
            holder,
            settings,
            shared: Arc::new(SessionShared {
                phase: Mutex::new(Phase::Idle),
                state,
                events,
            }),
            next_scan_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<DiscoveryState> {
        self.shared.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> DiscoveryState {
        self.shared.state.borrow().clone()
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.shared.state.borrow().to_vec()
    }

    pub fn is_scanning(&self) -> bool {
        matches!(*self.shared.lock_phase(), Phase::Scanning { .. })
    }

    /// Starts scanning for devices advertising `filter`'s service, with an empty device list.
    ///
    /// Returns [`DiscoveryError::AlreadyScanning`] without touching the running scan if the
    /// session is already scanning.
    pub fn start(&self, filter: ScanFilterSpec) -> Result<(), DiscoveryError> {
        let scan_id = {
            let mut phase = self.shared.lock_phase();
            if let Phase::Scanning { .. } = *phase {
                return Err(DiscoveryError::AlreadyScanning);
            }

            let scan_id = self.next_scan_id.fetch_add(1, Ordering::Relaxed);
            *phase = Phase::Scanning { scan_id, registration: None };
            self.shared.state.send_replace(DiscoveryState::new());
            let _ = self.shared.events.send(SessionEvent::Started(filter));
            scan_id
        };

        info!("Starting scan #{} for service {} ({:?})", scan_id, filter, self.settings);

        let callback = Arc::new(SessionCallback {
            shared: Arc::downgrade(&self.shared),
            scan_id,
        });

        let registration = match self.scanner.start_scan(&filter, &self.settings, callback) {
            Ok(registration) => registration,
            Err(err) => {
                warn!("Failed to start scan #{}: {}", scan_id, err);
                let mut phase = self.shared.lock_phase();
                if phase.accepts(Some(scan_id)) {
                    *phase = Phase::Idle;
                    let _ = self.shared.events.send(SessionEvent::Stopped);
                }
                return Err(err);
            },
        };

        let mut phase = self.shared.lock_phase();
        if let Phase::Scanning { scan_id: current, registration: slot } = &mut *phase {
            if *current == scan_id {
                *slot = Some(registration);
                return Ok(());
            }
        }
        drop(phase);

        debug!("Scan #{} was stopped while starting", scan_id);
        registration.release();
        Ok(())
    }

    /// Stops the scan. Does nothing when idle; the device list is kept either way.
    ///
    /// Once this returns no scan result will change the state anymore.
    pub fn stop(&self) {
        let registration = {
            let mut phase = self.shared.lock_phase();
            match std::mem::replace(&mut *phase, Phase::Idle) {
                Phase::Idle => return,
                Phase::Scanning { scan_id, registration } => {
                    info!("Stopping scan #{}", scan_id);
                    registration
                },
            }
        };

        if let Some(registration) = registration {
            registration.release();
        }
        let _ = self.shared.events.send(SessionEvent::Stopped);
    }

    /// Records a device in the running scan's list and emits if that changed anything.
    ///
    /// A re-seen device with nothing new, or any device while idle, is [`Sighting::Unchanged`]
    /// and is not emitted.
    pub fn on_device_found(&self, device: Device) -> Sighting {
        let summary = self.shared.merge(None, vec![device]);
        if summary.added > 0 {
            Sighting::Added
        } else if summary.updated > 0 {
            Sighting::Updated
        } else {
            Sighting::Unchanged
        }
    }

    /// Merges a whole batch and emits once. A batch that changes nothing is not emitted.
    pub fn on_batch_found(&self, devices: Vec<Device>) -> MergeSummary {
        self.shared.merge(None, devices)
    }

    pub fn on_scan_failed(&self, failure: ScanFailure) {
        self.shared.fail(None, failure);
    }

    /// Clears the device list and publishes [`SessionEvent::BluetoothDisabled`]. The session
    /// keeps its phase; the caller decides whether to stop.
    pub fn on_bluetooth_disabled(&self) {
        self.shared.bluetooth_disabled(None);
    }

    pub fn on_event(&self, event: ScanViewEvent) {
        match event {
            ScanViewEvent::Cancel => self.stop(),
            ScanViewEvent::DeviceSelected(device) => {
                self.holder.attach_device(device);
                self.stop();
            },
        }
    }
}

impl Drop for DeviceDiscoverySession {
    fn drop(&mut self) {
        self.stop();
    }
}

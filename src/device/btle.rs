use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::future::join_all;
use futures::stream::{self, Stream, StreamExt};
use indexmap::IndexMap;
use indexmap::map::Entry;
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Duration, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::constants::STOP_SCAN_DEADLINE;
use crate::device::scanner::{ScanCallback, ScanRegistration, Scanner};
use crate::device::types::{Device, ScanFailure, ScanFilterSpec, ScanSettings};
use crate::error::DiscoveryError;

type AdapterEvents = Pin<Box<dyn Stream<Item = (usize, CentralEvent)> + Send>>;

/// [`Scanner`] backed by the host's Bluetooth adapters through btleplug.
///
/// btleplug has no notion of scan modes or hardware batching, so batching is done here: results
/// are collected for `report_delay` and handed over as one batch.
#[derive(Clone)]
pub struct BtleScanner {
    manager: Manager,
    runtime: Handle,
    tasks: ScanTasks,
}

impl BtleScanner {
    /// Must be called from within a tokio runtime; scans are spawned onto it.
    pub async fn new() -> Result<Self, DiscoveryError> {
        let manager = Manager::new().await?;
        Ok(BtleScanner { manager, runtime: Handle::current(), tasks: ScanTasks::default() })
    }

    /// Waits for released scans to stop their adapters, giving up after `deadline`.
    pub async fn wait_stopped(&self, deadline: Duration) {
        self.tasks.wait(deadline).await;
    }
}

/// Scan tasks that may still be stopping their adapters.
#[derive(Clone, Default)]
struct ScanTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ScanTasks {
    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    async fn wait(&self, deadline: Duration) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        if handles.is_empty() {
            return;
        }

        debug!("Waiting for {} scan task(s) to stop", handles.len());
        if timeout(deadline, join_all(handles)).await.is_err() {
            warn!("Scan tasks did not stop in time");
        }
    }
}

impl Scanner for BtleScanner {
    fn start_scan(
        &self,
        filter: &ScanFilterSpec,
        settings: &ScanSettings,
        callback: Arc<dyn ScanCallback>,
    ) -> Result<ScanRegistration, DiscoveryError> {
        let cancel = CancellationToken::new();
        let task = scan_task(cancel.clone(), self.manager.clone(), *filter, *settings, callback);
        self.tasks.track(self.runtime.spawn(task));

        Ok(ScanRegistration::new(move || cancel.cancel()))
    }
}

async fn start_scanning(manager: &Manager, filter: &ScanFilterSpec) -> Result<Vec<Adapter>, DiscoveryError> {
    let adapters = manager.adapters().await?;
    if adapters.is_empty() {
        return Err(DiscoveryError::NoAdapter);
    }

    let scan_filter = ScanFilter {
        services: vec![filter.service],
    };

    for adapter in &adapters {
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(scan_filter.clone()).await?;
    }

    Ok(adapters)
}

async fn stop_scanning(adapters: &[Adapter]) {
    for adapter in adapters {
        tokio::select! {
            _ = sleep(Duration::from_millis(STOP_SCAN_DEADLINE)) => {
                warn!("Stopping the scan took too long");
            }
            result = adapter.stop_scan() => {
                if let Err(err) = result {
                    warn!("Failed to stop scanning: {:?}", err);
                }
            }
        }
    }
}

async fn adapter_events(adapters: &[Adapter]) -> Result<AdapterEvents, DiscoveryError> {
    let mut streams = Vec::with_capacity(adapters.len());
    for (index, adapter) in adapters.iter().enumerate() {
        let events = adapter.events().await?;
        streams.push(events.map(move |event| (index, event)));
    }

    Ok(Box::pin(stream::select_all(streams)))
}

fn device_from_properties(id: &PeripheralId, properties: PeripheralProperties) -> Device {
    // CoreBluetooth hides addresses and reports all zeroes
    let id = if properties.address == BDAddr::from([0u8; 6]) {
        format!("{:?}", id)
    } else {
        properties.address.to_string()
    };

    Device {
        id,
        name: properties.local_name,
        rssi: properties.rssi,
        highest_rssi: properties.rssi,
    }
}

async fn matching_device(adapter: &Adapter, id: &PeripheralId, filter: &ScanFilterSpec) -> Option<Device> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(v) => v,
        Err(err) => {
            warn!("Failed to look up peripheral {:?}: {}", id, err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            debug!("Peripheral {:?} has no properties", id);
            None
        },
        // Some environments ignore the filter, so make sure to check the service uuid again
        Ok(Some(properties)) if filter.matches(&properties.services) => Some(device_from_properties(id, properties)),
        Ok(Some(_)) => None,
    }
}

fn scan_failure(err: &DiscoveryError) -> ScanFailure {
    match err {
        DiscoveryError::NoAdapter => ScanFailure::FeatureUnsupported,
        DiscoveryError::Btle { source: btleplug::Error::PermissionDenied } => ScanFailure::PermissionDenied,
        DiscoveryError::Btle { source: btleplug::Error::NotSupported(_) } => ScanFailure::FeatureUnsupported,
        _ => ScanFailure::InternalError,
    }
}

fn queue_sighting(pending: &mut IndexMap<String, Device>, device: Device) {
    match pending.entry(device.id.clone()) {
        Entry::Occupied(mut entry) => {
            entry.get_mut().update(device);
        },
        Entry::Vacant(entry) => {
            entry.insert(device);
        },
    }
}

async fn next_flush(flush: &mut Option<Interval>) {
    match flush {
        Some(flush) => {
            flush.tick().await;
        },
        None => std::future::pending().await,
    }
}

async fn scan_task(
    cancel: CancellationToken,
    manager: Manager,
    filter: ScanFilterSpec,
    settings: ScanSettings,
    callback: Arc<dyn ScanCallback>,
) {
    debug!(
        "Scan settings: mode {:?}, legacy {}, hardware batching {} (not configurable through btleplug)",
        settings.mode, settings.legacy, settings.use_hardware_batching,
    );

    let started = tokio::select! {
        _ = cancel.cancelled() => return,
        result = start_scanning(&manager, &filter) => result,
    };

    let adapters = match started {
        Ok(adapters) => adapters,
        Err(err) => {
            warn!("Scanning failed {:?}", err);
            callback.on_scan_failed(scan_failure(&err));
            return;
        },
    };

    let mut events = match adapter_events(&adapters).await {
        Ok(events) => events,
        Err(err) => {
            warn!("Failed to subscribe to adapter events {:?}", err);
            callback.on_scan_failed(scan_failure(&err));
            stop_scanning(&adapters).await;
            return;
        },
    };

    let mut flush = settings.is_batching().then(|| {
        let mut flush = interval(settings.report_delay);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush
    });
    // one entry per device, later sightings within the same report delay are folded in
    let mut pending: IndexMap<String, Device> = IndexMap::new();

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            _ = next_flush(&mut flush) => {
                if !pending.is_empty() {
                    callback.on_batch_scan_results(std::mem::take(&mut pending).into_values().collect());
                }
            },
            event = events.next() => {
                let (index, id) = match event {
                    Some((index, CentralEvent::DeviceDiscovered(id)))
                    | Some((index, CentralEvent::DeviceUpdated(id)))
                    | Some((index, CentralEvent::ServicesAdvertisement { id, .. })) => (index, id),
                    Some(_) => continue 'mainloop,
                    None => {
                        // the adapters stop producing events when Bluetooth is turned off or removed
                        warn!("Adapter event stream ended");
                        callback.on_bluetooth_disabled();
                        break 'mainloop;
                    },
                };

                if let Some(device) = matching_device(&adapters[index], &id, &filter).await {
                    if flush.is_some() {
                        queue_sighting(&mut pending, device);
                    } else {
                        callback.on_scan_result(device);
                    }
                }
            },
        }
    }

    stop_scanning(&adapters).await;
    info!("Scan stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn failures_map_to_platform_codes() {
        assert_eq!(scan_failure(&DiscoveryError::NoAdapter), ScanFailure::FeatureUnsupported);
        assert_eq!(
            scan_failure(&DiscoveryError::Btle { source: btleplug::Error::PermissionDenied }),
            ScanFailure::PermissionDenied,
        );
        assert_eq!(
            scan_failure(&DiscoveryError::Btle { source: btleplug::Error::NotSupported("le".to_string()) }),
            ScanFailure::FeatureUnsupported,
        );
        assert_eq!(scan_failure(&DiscoveryError::AlreadyScanning), ScanFailure::InternalError);
    }

    #[test]
    fn pending_batch_folds_repeated_sightings() {
        let mut pending = IndexMap::new();
        queue_sighting(&mut pending, Device::new("A").with_rssi(-80));
        queue_sighting(&mut pending, Device::new("B"));
        queue_sighting(&mut pending, Device::new("A").with_name("HRM").with_rssi(-60));

        let batch: Vec<Device> = pending.into_values().collect();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], Device::new("A").with_name("HRM").with_rssi(-60));
        assert_eq!(batch[1].id, "B");
    }

    #[tokio::test]
    async fn waits_for_cancelled_scans_to_clean_up() {
        let tasks = ScanTasks::default();
        let cancel = CancellationToken::new();
        let cleaned_up = Arc::new(AtomicBool::new(false));

        let token = cancel.clone();
        let flag = cleaned_up.clone();
        tasks.track(tokio::spawn(async move {
            token.cancelled().await;
            sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        }));

        cancel.cancel();
        tasks.wait(Duration::from_secs(5)).await;
        assert!(cleaned_up.load(Ordering::SeqCst));

        // nothing left to wait for
        tasks.wait(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn unbatched_settings_never_flush() {
        let mut flush: Option<Interval> = None;
        let flushed = tokio::time::timeout(Duration::from_millis(20), next_flush(&mut flush)).await;
        assert!(flushed.is_err());
    }
}

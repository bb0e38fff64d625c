use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;

use crate::cli::args::Args;
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::btle::BtleScanner;
use crate::device::constants::STOP_SCAN_DEADLINE;
use crate::device::holder::SelectedDeviceHolder;
use crate::device::session::DeviceDiscoverySession;
use crate::device::state::DiscoveryState;
use crate::device::types::{Device, DeviceListFilter, ScanFailure, ScanFilterSpec, ScanViewEvent, SessionEvent};
use crate::error::{AppRunError, DiscoveryError};
use crate::permission::{HostPermissionRegistry, PermissionGate};

async fn load_config(config_io: &ConfigIO) -> Config {
    if let Err(err) = config_io.init_if_empty().await {
        warn!("Failed to write default config: {}", &err);
    }

    match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                // this is probably the first start of the app
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", &err);
            }
            Config::default()
        },
    }
}

fn print_device(number: usize, device: &Device) {
    let name = device.name.as_deref().unwrap_or("<unnamed>");
    match device.rssi {
        Some(rssi) => println!("{:>3}. {}  {}  {} dBm", number, device.id, name, rssi),
        None => println!("{:>3}. {}  {}", number, device.id, name),
    }
}

// Devices can start matching the list filter late, so track what was printed instead of counting.
fn print_new_devices(state: &DiscoveryState, list: &DeviceListFilter, printed: &mut HashSet<String>) -> usize {
    let mut new_devices = 0;
    for device in state.filtered(list) {
        if printed.insert(device.id.clone()) {
            print_device(printed.len(), device);
            new_devices += 1;
        }
    }
    new_devices
}

fn list_filter(config: &Config, args: &Args) -> DeviceListFilter {
    let mut list = config.list.clone();
    if args.nearby_only {
        list.nearby_only = true;
    }
    if let Some(prefix) = &args.name_prefix {
        list.name_prefix = Some(prefix.clone());
    }
    list
}

fn scan_failure_error(failure: ScanFailure) -> AppRunError {
    match failure {
        ScanFailure::PermissionDenied => DiscoveryError::PermissionDenied.into(),
        failure => AppRunError::ScanFailed { failure },
    }
}

async fn run_discovery(args: Args) -> Result<(), AppRunError> {
    let config_io = match &args.config {
        Some(path) => ConfigIO::open_sync(path)?,
        None => ConfigIO::new_sync()?,
    };
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let config = load_config(&config_io).await;
    let filter: ScanFilterSpec = match &args.service {
        Some(service) => service.parse()?,
        None => config.filter()?,
    };
    let mut settings = config.scan_settings();
    if let Some(report_delay) = args.report_delay {
        settings.report_delay = report_delay;
    }
    let list = list_filter(&config, &args);

    let gate = PermissionGate::new(HostPermissionRegistry::new(config.permission.clone()));
    if !gate.is_scan_permission_granted() {
        return Err(DiscoveryError::PermissionDenied.into());
    }

    let scanner = Arc::new(BtleScanner::new().await?);
    let holder = Arc::new(SelectedDeviceHolder::new());
    let session = DeviceDiscoverySession::with_settings(scanner.clone(), holder.clone(), settings);

    let mut devices = session.subscribe();
    let mut events = session.events();
    session.start(filter)?;
    info!("Scanning for {} for {}", filter, humantime::format_duration(args.duration));

    let deadline = sleep(args.duration);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(deadline);
    tokio::pin!(interrupted);

    let mut printed = HashSet::new();
    let mut outcome = Ok(());

    'mainloop: loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Scan duration elapsed");
                session.on_event(ScanViewEvent::Cancel);
                break 'mainloop;
            },
            _ = &mut interrupted => {
                info!("Interrupted");
                session.on_event(ScanViewEvent::Cancel);
                break 'mainloop;
            },
            changed = devices.changed() => {
                if changed.is_err() {
                    break 'mainloop;
                }

                let state = devices.borrow_and_update().clone();
                print_new_devices(&state, &list, &mut printed);

                if args.select_first {
                    if let Some(device) = state.filtered(&list).next() {
                        session.on_event(ScanViewEvent::DeviceSelected(device.clone()));
                        break 'mainloop;
                    }
                }
            },
            event = events.recv() => match event {
                Ok(SessionEvent::ScanFailed(failure)) => {
                    session.on_event(ScanViewEvent::Cancel);
                    outcome = Err(scan_failure_error(failure));
                    break 'mainloop;
                },
                Ok(SessionEvent::BluetoothDisabled) => {
                    session.on_event(ScanViewEvent::Cancel);
                    outcome = Err(DiscoveryError::BluetoothDisabled.into());
                    break 'mainloop;
                },
                Ok(event) => {
                    info!("Session event: {:?}", event);
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} session events", skipped);
                },
                Err(RecvError::Closed) => {
                    break 'mainloop;
                },
            },
        }
    }

    session.stop();
    scanner.wait_stopped(Duration::from_millis(STOP_SCAN_DEADLINE * 2)).await;

    info!("Discovered {} device(s)", session.snapshot().len());
    if let Some(device) = holder.detach_device() {
        println!("Selected {}", device);
    }

    outcome
}

pub fn run_application(args: Args) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_discovery(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    #[tokio::test]
    async fn broken_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let config = load_config(&ConfigIO::open_sync(&path).unwrap()).await;
        assert_eq!(config, Config::default());
        // a broken file is left for the user to fix
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2");
    }

    #[tokio::test]
    async fn first_run_leaves_a_config_to_edit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config(&ConfigIO::open_sync(&path).unwrap()).await;
        assert_eq!(config, Config::default());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn only_new_devices_are_printed() {
        let list = DeviceListFilter::default();
        let mut printed = HashSet::new();
        let mut state = DiscoveryState::new();
        state.merge(vec![Device::new("A"), Device::new("B")]);
        assert_eq!(print_new_devices(&state, &list, &mut printed), 2);

        state.record(Device::new("C").with_rssi(-60));
        state.record(Device::new("A").with_name("renamed"));
        assert_eq!(print_new_devices(&state, &list, &mut printed), 1);
        assert_eq!(printed.len(), 3);
    }

    #[test]
    fn devices_coming_nearby_are_printed_late() {
        let list = DeviceListFilter { nearby_only: true, name_prefix: None };
        let mut printed = HashSet::new();
        let mut state = DiscoveryState::new();
        state.merge(vec![Device::new("A").with_rssi(-80), Device::new("B").with_rssi(-40)]);
        assert_eq!(print_new_devices(&state, &list, &mut printed), 1);

        state.record(Device::new("A").with_rssi(-49));
        assert_eq!(print_new_devices(&state, &list, &mut printed), 1);
        assert!(printed.contains("A"));
    }

    #[test]
    fn command_line_narrows_the_configured_list() {
        let mut config = Config::default();
        config.list.name_prefix = Some("HRM".to_string());

        let args = Args::try_parse_from(["ble-discovery", "--nearby-only"]).unwrap();
        assert_eq!(list_filter(&config, &args), DeviceListFilter { nearby_only: true, name_prefix: Some("HRM".to_string()) });

        let args = Args::try_parse_from(["ble-discovery", "--name-prefix", "YX_"]).unwrap();
        assert_eq!(list_filter(&config, &args).name_prefix.as_deref(), Some("YX_"));
    }

    #[test]
    fn denied_permission_is_reported_as_such() {
        assert!(matches!(
            scan_failure_error(ScanFailure::PermissionDenied),
            AppRunError::DiscoveryError { source: DiscoveryError::PermissionDenied },
        ));
        assert!(matches!(
            scan_failure_error(ScanFailure::OutOfHardwareResources),
            AppRunError::ScanFailed { failure: ScanFailure::OutOfHardwareResources },
        ));
    }

    #[test]
    fn config_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let first = ConfigIO::open_sync(&path).unwrap();
        let second = ConfigIO::open_sync(&path).unwrap();

        let mut first_locker = first.locker().unwrap();
        let _guard = first_locker.lock().unwrap();

        let mut second_locker = second.locker().unwrap();
        assert!(second_locker.lock().is_err());
    }
}

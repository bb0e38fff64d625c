use std::env;
use crate::cli::application::run_application;
use crate::cli::args::Args;
use crate::error::AppRunError;

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod permission;

pub use device::holder::{DeviceHolder, SelectedDeviceHolder};
pub use device::scanner::{ScanCallback, ScanRegistration, Scanner};
pub use device::session::DeviceDiscoverySession;
pub use device::state::{DiscoveryState, MergeSummary, Sighting};
pub use device::types::{Device, DeviceListFilter, ScanFailure, ScanFilterSpec, ScanMode, ScanSettings, ScanViewEvent, SessionEvent};
pub use permission::{PermissionGate, PermissionRegistry};

pub fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        match fern::log_file(&log_file) {
            Ok(file) => dispatch = dispatch.chain(file),
            Err(err) => eprintln!("Failed to open LOG_FILE {}: {}", log_file, err),
        }
    }

    if let Err(err) = dispatch.apply() {
        eprintln!("Failed to initialize logger: {}", err);
    }
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    run_application(args)?;
    Ok(())
}

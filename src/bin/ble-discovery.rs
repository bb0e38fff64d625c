use clap::Parser;
use log::{error, info};
use ble_discovery::{init_logging, run};
use ble_discovery::cli::args::Args;
use ble_discovery::error::{AppRunError, ConfigError, DiscoveryError};

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!(concat!("BLE Discovery ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another instance is already scanning");
            Ok(())
        },
        Err(err @ AppRunError::DiscoveryError { source: DiscoveryError::PermissionDenied }) => {
            error!("Bluetooth permission has not been granted; grant it and try again");
            Err(err)
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}

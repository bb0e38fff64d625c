use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Scans for Bluetooth LE devices advertising a service and lists them as they are discovered.\n\nExample: ble-discovery --service 0000180d-0000-1000-8000-00805f9b34fb --duration 20s", long_about = None)]
pub struct Args {
    /// Service UUID that advertisements must carry. Defaults to the value in the config file.
    #[arg(long)]
    pub service: Option<String>,

    /// Stop scanning after this long, for example "30s" or "2m".
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub duration: Duration,

    /// Deliver results in batches collected over this long. "0s" reports every device immediately.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub report_delay: Option<Duration>,

    /// Only list devices whose signal reached -50 dBm at some point during the scan.
    #[arg(long)]
    pub nearby_only: bool,

    /// Only list devices whose advertised name starts with this.
    #[arg(long)]
    pub name_prefix: Option<String>,

    /// Select the first listed device and stop.
    #[arg(long)]
    pub select_first: bool,

    /// Path to the config file to use instead of the default location.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long)]
    pub verbose: bool,
}

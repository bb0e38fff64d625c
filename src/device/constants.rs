/**
 * How long (milliseconds) the scanner may coalesce results before delivering them as one batch.
 */
pub const REPORT_DELAY: u64 = 5000;

/**
 * How long (milliseconds) stopping the scan on an adapter may take.
 */
pub const STOP_SCAN_DEADLINE: u64 = 2000;

/**
 * The first platform version (API level) on which Bluetooth access is a runtime permission.
 * Older versions grant it at install time.
 */
pub const SCOPED_BLUETOOTH_PERMISSION_VERSION: u32 = 31;

/**
 * Capacity of the session event channel. Slow subscribers that fall further behind than this
 * observe a lag instead of blocking the scanner.
 */
pub const SESSION_EVENT_CAPACITY: usize = 16;

/**
 * Signal strength (dBm) a device must have reached to count as nearby.
 */
pub const NEARBY_RSSI: i16 = -50;

/**
 * The UUID of the Bluetooth SIG Heart Rate service, used when no service is configured.
 */
pub const HEART_RATE_SERVICE: &str = "0000180d-0000-1000-8000-00805f9b34fb";

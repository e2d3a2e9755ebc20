//! Exec-mode commands issued by `DeviceSession`.
//!
//! The filters keep responses short; extraction in `facts` does not depend
//! on them and also works on unfiltered output.

/// Boot image, software version and memory lines in one round-trip.
pub const SHOW_VERSION: &str = "show version | include System image file is|Software|bytes of memory";

/// Only the `hostname` directive of the running configuration.
pub const SHOW_HOSTNAME: &str = "show running-config | include ^hostname";

/// Full running configuration, used for backups.
pub const SHOW_RUNNING_CONFIG: &str = "show running-config";

/// Global CDP state.
pub const SHOW_CDP: &str = "show cdp";

/// One `Device ID` line per CDP neighbor.
pub const SHOW_CDP_NEIGHBORS: &str = "show cdp neighbors detail | include Device ID";

/// NTP clock state line.
pub const SHOW_NTP_STATUS: &str = "show ntp status | include Clock is";

/// Ping `address` from the device.
pub fn ping(address: &str) -> String {
    format!("ping {address}")
}

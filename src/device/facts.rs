//! Fact extraction from free-text CLI output
//!
//! Pure functions: text in, typed fact out. No I/O, no state. Each pattern is
//! compiled once on first use. Matching is best-effort; a miss yields `None`
//! (or the documented default) rather than an error.
//!
//! Two extractors accept more than their primary pattern:
//!
//! - OS version: `Software ... Version X,` first; failing that, `Version X,`
//!   on any line except the boot ROM lines (`ROM:`, `BOOTLDR:`, `Bootstrap`),
//!   which carry the ROM monitor version rather than the running image's.
//! - Hardware: `cisco X ... processor ... bytes of memory` first; failing
//!   that, a line starting with `cisco X` and ending in `bytes of memory`,
//!   the form newer IOS releases print without the word `processor`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Patterns
// ============================================================================

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("fact pattern is valid"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?m)Software.*?\bVersion\s+([^,\s]+),")
}

fn bare_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?m)\bVersion\s+([^,\s]+),")
}

fn hardware_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?mi)\bcisco\s+(\S+)\s.*processor.*bytes of memory")
}

fn hardware_no_processor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?mi)^\s*cisco\s+(\S+)\s.*bytes of memory")
}

fn npe_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?m)image file is .*_npe")
}

fn hostname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?m)^hostname\s+(\S+)\s*$")
}

fn cdp_negation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?mi)is.*not.*enabled")
}

// ============================================================================
// Show version
// ============================================================================

/// Everything derived from the combined show-version query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionFacts {
    pub ios_version: Option<String>,
    pub hardware_type: Option<String>,
    /// Always definite: a successful query either shows the NPE marker or not
    pub is_npe: bool,
}

/// Parse all show-version facts in one pass.
pub fn parse_show_version(output: &str) -> VersionFacts {
    VersionFacts {
        ios_version: parse_ios_version(output),
        hardware_type: parse_hardware_type(output),
        is_npe: parse_is_npe(output),
    }
}

/// Version token following `Version` on the software line, up to the comma.
pub fn parse_ios_version(output: &str) -> Option<String> {
    version_re()
        .captures(output)
        .or_else(|| {
            output
                .lines()
                .filter(|line| !is_boot_rom_line(line))
                .find_map(|line| bare_version_re().captures(line))
        })
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn is_boot_rom_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("ROM:") || line.starts_with("BOOTLDR:") || line.contains("Bootstrap")
}

/// Platform token between `cisco` and the memory line.
pub fn parse_hardware_type(output: &str) -> Option<String> {
    hardware_re()
        .captures(output)
        .or_else(|| hardware_no_processor_re().captures(output))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// True iff the boot image filename carries the `_npe` marker.
pub fn parse_is_npe(output: &str) -> bool {
    npe_image_re().is_match(output)
}

// ============================================================================
// Running config
// ============================================================================

/// Value of the `hostname` directive.
pub fn parse_hostname(output: &str) -> Option<String> {
    hostname_re()
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// ============================================================================
// CDP
// ============================================================================

/// Global CDP state as read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdpStatus {
    Enabled,
    Disabled,
    /// Empty or missing output; nothing to decide on
    Unknown,
}

impl CdpStatus {
    pub fn is_enabled(self) -> bool {
        self == CdpStatus::Enabled
    }
}

/// Disabled iff the output carries the negation (`CDP is not enabled`).
///
/// Any other non-empty output counts as enabled: devices print several
/// different positive forms. Empty output is `Unknown`, never enabled.
pub fn parse_cdp_status(output: &str) -> CdpStatus {
    if output.trim().is_empty() {
        CdpStatus::Unknown
    } else if cdp_negation_re().is_match(output) {
        CdpStatus::Disabled
    } else {
        CdpStatus::Enabled
    }
}

/// Number of `Device ID` lines in the neighbor-detail listing.
pub fn count_cdp_peers(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.contains("Device ID"))
        .count()
}

// ============================================================================
// NTP / reachability
// ============================================================================

pub fn parse_ntp_synchronized(output: &str) -> bool {
    output.contains("Clock is synchronized")
}

/// A ping counts only when every echo request was answered.
pub fn parse_ping_success(output: &str) -> bool {
    output.contains("Success rate is 100 percent")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_VERSION_2911: &str = "\
Cisco IOS Software, C2900 Software (C2900-UNIVERSALK9-M), Version 15.4(3)M2, RELEASE SOFTWARE (fc2)
System image file is \"flash0:c2900-universalk9-mz.SPA.154-3.M2.bin\"
cisco CISCO2911/K9 (revision 1.0) processor with 512000K bytes of memory.";

    #[test]
    fn test_ios_version() {
        assert_eq!(
            parse_ios_version(SHOW_VERSION_2911).as_deref(),
            Some("15.4(3)M2")
        );
        assert_eq!(
            parse_ios_version("...Version 15.4(3)M2,...").as_deref(),
            Some("15.4(3)M2")
        );
    }

    #[test]
    fn test_boot_rom_version_is_ignored() {
        let rom = "ROM: System Bootstrap, Version 15.0(1r)M15, RELEASE SOFTWARE (fc1)";
        assert_eq!(parse_ios_version(rom), None);
        assert_eq!(
            parse_ios_version(&format!("{rom}\nIOS Version 15.4(3)M2, RELEASE")).as_deref(),
            Some("15.4(3)M2")
        );
    }

    #[test]
    fn test_ios_version_miss() {
        assert_eq!(parse_ios_version("% Invalid input"), None);
        assert_eq!(parse_ios_version(""), None);
    }

    #[test]
    fn test_hardware_type() {
        assert_eq!(
            parse_hardware_type(
                "cisco CISCO2911/K9 (revision 1.0) processor with 512000K bytes of memory"
            )
            .as_deref(),
            Some("CISCO2911/K9")
        );
        assert_eq!(
            parse_hardware_type("Cisco CISCO1941/K9 (revision 1.0) with 491520K/32768K bytes of memory.")
                .as_deref(),
            Some("CISCO1941/K9")
        );
        assert_eq!(parse_hardware_type("no memory line here"), None);
    }

    #[test]
    fn test_software_line_is_not_hardware() {
        let facts = parse_show_version(SHOW_VERSION_2911);
        assert_eq!(facts.hardware_type.as_deref(), Some("CISCO2911/K9"));
    }

    #[test]
    fn test_npe_detection() {
        assert!(parse_is_npe(
            "System image file is \"flash0:c2900-universalk9_npe.SPA.154-3.M2.bin\""
        ));
        assert!(!parse_is_npe(
            "System image file is \"flash0:c2900-universalk9-mz.SPA.154-3.M2.bin\""
        ));
        assert!(!parse_is_npe(""));
        assert!(!parse_show_version(SHOW_VERSION_2911).is_npe);
    }

    #[test]
    fn test_hostname() {
        let config = "Building configuration...\n!\nversion 15.4\nhostname edge-rtr-01\n!\nend";
        assert_eq!(parse_hostname(config).as_deref(), Some("edge-rtr-01"));
        assert_eq!(parse_hostname("hostname core-sw\r\n").as_deref(), Some("core-sw"));
        assert_eq!(parse_hostname(" no hostname here"), None);
    }

    #[test]
    fn test_cdp_status() {
        assert_eq!(parse_cdp_status("% CDP is not enabled"), CdpStatus::Disabled);
        assert_eq!(
            parse_cdp_status("Global CDP information: Sending CDP packets every 60 seconds"),
            CdpStatus::Enabled
        );
        assert_eq!(parse_cdp_status(""), CdpStatus::Unknown);
        assert_eq!(parse_cdp_status("  \n "), CdpStatus::Unknown);
        assert!(CdpStatus::Enabled.is_enabled());
        assert!(!CdpStatus::Unknown.is_enabled());
    }

    #[test]
    fn test_cdp_peer_count() {
        let out = "Device ID: sw-01\nDevice ID: sw-02\nDevice ID: rtr-09.lab";
        assert_eq!(count_cdp_peers(out), 3);
        assert_eq!(count_cdp_peers(""), 0);
    }

    #[test]
    fn test_ntp_and_ping() {
        assert!(parse_ntp_synchronized(
            "Clock is synchronized, stratum 3, reference is 172.16.0.1"
        ));
        assert!(!parse_ntp_synchronized(
            "Clock is unsynchronized, stratum 16, no reference clock"
        ));
        assert!(parse_ping_success(
            "Success rate is 100 percent (5/5), round-trip min/avg/max = 1/1/4 ms"
        ));
        assert!(!parse_ping_success("Success rate is 80 percent (4/5)"));
    }
}

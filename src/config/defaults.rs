//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery. Every value here can be
//! overridden from `netfleet.toml` or the command line unless noted.

// ============================================================================
// Orchestration
// ============================================================================

/// Upper bound on devices processed concurrently.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Hard ceiling accepted by config validation for `max_workers`.
pub const MAX_WORKERS_LIMIT: usize = 256;

/// Separator between fields of the per-device summary line.
pub const DEFAULT_DELIMITER: &str = ";";

// ============================================================================
// Backups
// ============================================================================

/// Directory receiving running-config backups.
pub const DEFAULT_BACKUP_DIR: &str = "./backups/";

/// `chrono` format for the backup filename prefix (`2024-03-01-`).
pub const BACKUP_DATE_FORMAT: &str = "%Y-%m-%d-";

// ============================================================================
// Device sessions
// ============================================================================

/// Timeout for opening and authenticating a session (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Timeout for a single command or config batch round-trip (seconds).
///
/// Generous because `show running-config` on large devices is slow.
pub const COMMAND_TIMEOUT_SECS: u64 = 60;

/// Longest single wait for the device prompt inside the SSH transport
/// (seconds). Not configurable; bounded by the command timeout anyway.
pub const SSH_PROMPT_TIMEOUT_SECS: u64 = 90;

/// SSH port when neither the host entry nor `[defaults]` sets one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Device dialect assumed when none is configured.
pub const DEFAULT_DEVICE_TYPE: &str = "cisco_ios";

/// Login user assumed when none is configured.
pub const DEFAULT_USERNAME: &str = "admin";

// ============================================================================
// Configuration discovery
// ============================================================================

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "NETFLEET_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "netfleet.toml";

/// Environment variable overriding `[defaults].password`.
pub const PASSWORD_ENV: &str = "NETFLEET_PASSWORD";

/// Environment variable overriding `[defaults].secret`.
pub const SECRET_ENV: &str = "NETFLEET_SECRET";

//! Fleet Configuration - run settings, credential defaults, inventory and policy
//!
//! One TOML file describes a whole run. Every section is optional; a missing
//! file yields the built-in defaults and an empty inventory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::defaults::{
    COMMAND_TIMEOUT_SECS, CONFIG_PATH_ENV, CONNECT_TIMEOUT_SECS, DEFAULT_BACKUP_DIR,
    DEFAULT_CONFIG_FILE, DEFAULT_DELIMITER, DEFAULT_MAX_WORKERS, PASSWORD_ENV, SECRET_ENV,
};
use crate::device::SessionSettings;
use crate::inventory::{HostDefaults, HostEntry};
use crate::policy::PolicyRule;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one fleet run.
///
/// Load with `FleetConfig::load()` which searches:
/// 1. an explicit path (the `--config` flag)
/// 2. `$NETFLEET_CONFIG` env var
/// 3. `./netfleet.toml`
/// 4. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Process-wide run settings
    #[serde(default)]
    pub settings: RunSettings,

    /// Credential template applied to every host
    #[serde(default)]
    pub defaults: HostDefaults,

    /// Managed devices, processed in this order
    #[serde(default)]
    pub hosts: Vec<HostEntry>,

    /// Optional conditional reconfiguration rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,
}

impl FleetConfig {
    /// Load configuration using the standard search order.
    ///
    /// A file that was asked for explicitly (flag or env var) must exist.
    /// Only the implicit `./netfleet.toml` may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        // 1. --config
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), hosts = config.hosts.len(), "Loaded fleet config");
            return Ok(config);
        }

        // 2. Env var
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let p = PathBuf::from(&path);
            if !p.exists() {
                return Err(ConfigError::NotFound(p));
            }
            let config = Self::load_from_file(&p)?;
            info!(path = %p.display(), hosts = config.hosts.len(), "Loaded fleet config from {}", CONFIG_PATH_ENV);
            return Ok(config);
        }

        // 3. ./netfleet.toml
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!(hosts = config.hosts.len(), "Loaded fleet config from ./{}", DEFAULT_CONFIG_FILE);
            return Ok(config);
        }

        // 4. Defaults
        info!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text.
    ///
    /// Two-pass: unknown keys are reported as warnings first, then the
    /// text is deserialized and validated.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `$NETFLEET_PASSWORD` / `$NETFLEET_SECRET` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as `apply_env_overrides` with an injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.defaults.password = password;
        }
        if let Some(secret) = lookup(SECRET_ENV) {
            self.defaults.secret = secret;
        }
    }

    /// Validate settings, inventory and policy.
    ///
    /// Errors are impossible values that must prevent the run; range
    /// warnings are logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (mut errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }

        if let Some(policy) = &self.policy {
            if let Err(e) = PolicyRule::from_config(policy) {
                errors.push(format!("policy: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The resolved policy rule, if one is configured.
    pub fn policy_rule(&self) -> Result<Option<PolicyRule>, ConfigError> {
        self.policy
            .as_ref()
            .map(PolicyRule::from_config)
            .transpose()
            .map_err(|e| ConfigError::Validation(vec![format!("policy: {e}")]))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_secs(self.settings.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.settings.command_timeout_secs),
        }
    }

    /// Serialize the current config to a TOML string (secrets omitted).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Run Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Verbose logging when `RUST_LOG` is not set
    pub debug: bool,

    /// Separator between summary fields
    pub delimiter: String,

    /// Directory receiving running-config backups
    pub backup_dir: PathBuf,

    /// Devices processed concurrently
    pub max_workers: usize,

    pub connect_timeout_secs: u64,

    pub command_timeout_secs: u64,

    /// Check SSH host keys against `~/.ssh/known_hosts`
    pub verify_host_keys: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            debug: false,
            delimiter: DEFAULT_DELIMITER.to_string(),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            max_workers: DEFAULT_MAX_WORKERS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            command_timeout_secs: COMMAND_TIMEOUT_SECS,
            verify_host_keys: true,
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Raw `[policy]` table; resolved into a `PolicyRule` at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Exactly one `predicate = "argument"` pair
    #[serde(default)]
    pub when: BTreeMap<String, String>,

    /// Configuration lines pushed when the predicate holds
    #[serde(default)]
    pub then: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Predicate;

    const SAMPLE: &str = r#"
[settings]
debug = true
delimiter = " | "
backup_dir = "/var/backups/netfleet"
max_workers = 8

[defaults]
device_type = "cisco_ios"
username = "netops"
password = "pw"
secret = "en"

[[hosts]]
host = "10.0.0.1"

[[hosts]]
host = "10.0.0.2"

[policy]
when = { host_reachable = "172.16.0.1" }
then = ["clock timezone GMT 0", "ntp server 172.16.0.1"]
"#;

    #[test]
    fn test_defaults_are_valid() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settings.max_workers, 4);
        assert_eq!(config.settings.delimiter, ";");
        assert_eq!(config.settings.backup_dir, PathBuf::from("./backups/"));
        assert!(config.hosts.is_empty());
        assert!(config.policy_rule().unwrap().is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config = FleetConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.settings.debug);
        assert_eq!(config.settings.delimiter, " | ");
        assert_eq!(config.settings.max_workers, 8);
        assert_eq!(config.settings.connect_timeout_secs, 30);
        assert_eq!(config.defaults.username, "netops");
        assert_eq!(config.defaults.port, 22);
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[1].host, "10.0.0.2");

        let rule = config.policy_rule().unwrap().unwrap();
        assert_eq!(rule.predicate, Predicate::HostReachable("172.16.0.1".to_string()));
        assert_eq!(rule.commands[1], "ntp server 172.16.0.1");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = FleetConfig::from_toml_str("[settings]\nmax_workers = 0\n").unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.contains("max_workers")));
            }
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_unknown_predicate_rejected_at_load() {
        let toml = "[policy]\nwhen = { is_host_available = \"1.1.1.1\" }\nthen = [\"ntp server 1.1.1.1\"]\n";
        let err = FleetConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("is_host_available"));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = FleetConfig::from_toml_str("[settings\nmax_workers = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FleetConfig::from_toml_str(SAMPLE).unwrap();
        config.apply_overrides_from(|key| match key {
            "NETFLEET_PASSWORD" => Some("from-env".to_string()),
            _ => None,
        });
        assert_eq!(config.defaults.password, "from-env");
        assert_eq!(config.defaults.secret, "en");
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netfleet.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = FleetConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.hosts.len(), 2);

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            FleetConfig::load(Some(missing.as_path())),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_to_toml_omits_secrets() {
        let config = FleetConfig::from_toml_str(SAMPLE).unwrap();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("netops"));
        assert!(!rendered.contains("password"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_session_settings_from_config() {
        let config = FleetConfig::from_toml_str("[settings]\ncommand_timeout_secs = 5\n").unwrap();
        let settings = config.session_settings();
        assert_eq!(settings.command_timeout, Duration::from_secs(5));
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
    }
}

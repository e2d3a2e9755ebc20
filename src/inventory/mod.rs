//! Device inventory: host entries plus a shared credential template.
//!
//! The factory turns every `[[hosts]]` entry into one `ConnectionCredential`
//! filled from `[defaults]`, then into one `DeviceSession`.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::defaults::{DEFAULT_DEVICE_TYPE, DEFAULT_SSH_PORT, DEFAULT_USERNAME};
use crate::device::{DeviceSession, SessionSettings};
use crate::transport::Connector;
use crate::types::ConnectionCredential;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("host entry #{0} has an empty address")]
    EmptyHost(usize),

    #[error("host '{0}' is listed more than once")]
    DuplicateHost(String),
}

/// One `[[hosts]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub host: String,
}

impl HostEntry {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

/// Credential template applied to every host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostDefaults {
    pub device_type: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub secret: String,
}

impl Default for HostDefaults {
    fn default() -> Self {
        Self {
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: String::new(),
            port: DEFAULT_SSH_PORT,
            secret: String::new(),
        }
    }
}

impl std::fmt::Debug for HostDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDefaults")
            .field("device_type", &self.device_type)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl HostDefaults {
    pub fn credential_for(&self, host: &str) -> ConnectionCredential {
        ConnectionCredential {
            host: host.to_string(),
            device_type: self.device_type.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            port: self.port,
            secret: self.secret.clone(),
        }
    }
}

/// Check the host list without building anything.
pub fn check_hosts(hosts: &[HostEntry]) -> Vec<InventoryError> {
    let mut seen = HashSet::new();
    let mut problems = Vec::new();
    for (index, entry) in hosts.iter().enumerate() {
        let host = entry.host.trim();
        if host.is_empty() {
            problems.push(InventoryError::EmptyHost(index + 1));
        } else if !seen.insert(host) {
            problems.push(InventoryError::DuplicateHost(host.to_string()));
        }
    }
    problems
}

/// One credential per usable host entry, in inventory order.
///
/// Empty and repeated addresses are skipped with a warning; a device is
/// never processed twice in one run.
pub fn device_factory(hosts: &[HostEntry], defaults: &HostDefaults) -> Vec<ConnectionCredential> {
    let mut seen = HashSet::new();
    let mut credentials = Vec::with_capacity(hosts.len());

    for (index, entry) in hosts.iter().enumerate() {
        let host = entry.host.trim();
        if host.is_empty() {
            warn!(error = %InventoryError::EmptyHost(index + 1), "Skipping host entry");
            continue;
        }
        if !seen.insert(host.to_string()) {
            warn!(error = %InventoryError::DuplicateHost(host.to_string()), "Skipping host entry");
            continue;
        }
        credentials.push(defaults.credential_for(host));
    }

    debug!(devices = credentials.len(), "Inventory built");
    credentials
}

/// Wrap each credential in its own session sharing one connector.
pub fn build_sessions(
    credentials: Vec<ConnectionCredential>,
    connector: Arc<dyn Connector>,
    settings: SessionSettings,
) -> Vec<DeviceSession> {
    credentials
        .into_iter()
        .map(|credential| DeviceSession::new(credential, Arc::clone(&connector), settings))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> HostDefaults {
        HostDefaults {
            password: "pw".to_string(),
            secret: "en".to_string(),
            ..HostDefaults::default()
        }
    }

    #[test]
    fn test_factory_fills_defaults() {
        let hosts = vec![HostEntry::new("10.0.0.1"), HostEntry::new("10.0.0.2")];
        let creds = device_factory(&hosts, &defaults());

        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].host, "10.0.0.1");
        assert_eq!(creds[1].host, "10.0.0.2");
        assert_eq!(creds[0].device_type, "cisco_ios");
        assert_eq!(creds[0].username, "admin");
        assert_eq!(creds[0].port, 22);
        assert_eq!(creds[0].password, "pw");
        assert_eq!(creds[0].secret, "en");
    }

    #[test]
    fn test_factory_skips_empty_and_duplicate_hosts() {
        let hosts = vec![
            HostEntry::new("10.0.0.1"),
            HostEntry::new(" "),
            HostEntry::new("10.0.0.1 "),
            HostEntry::new("10.0.0.3"),
        ];
        let creds = device_factory(&hosts, &defaults());
        let addrs: Vec<&str> = creds.iter().map(|c| c.host.as_str()).collect();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.3"]);

        assert_eq!(
            check_hosts(&hosts),
            vec![
                InventoryError::EmptyHost(2),
                InventoryError::DuplicateHost("10.0.0.1".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_inventory() {
        assert!(device_factory(&[], &defaults()).is_empty());
    }

    #[test]
    fn test_defaults_debug_redacts_secrets() {
        let rendered = format!("{:?}", defaults());
        assert!(!rendered.contains("pw\""));
        assert!(!rendered.contains("\"en\""));
        assert!(rendered.contains("<redacted>"));
    }
}

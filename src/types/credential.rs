//! Connection credentials for a single managed device.

use serde::{Deserialize, Serialize};

/// Everything a transport needs to open an authenticated CLI session.
///
/// Built once per inventory entry by [`crate::inventory::device_factory`]
/// and never mutated afterwards. `Debug` redacts the password and the
/// privileged-mode secret so credentials can be logged safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCredential {
    /// Management address (IP or DNS name)
    pub host: String,
    /// CLI dialect tag, e.g. `cisco_ios`
    pub device_type: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// TCP port of the management service
    pub port: u16,
    /// Privileged-mode ("enable") secret
    #[serde(skip_serializing)]
    pub secret: String,
}

impl ConnectionCredential {
    /// `host:port` form used in log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the dialect tag names a Cisco-style CLI.
    pub fn is_cisco_dialect(&self) -> bool {
        self.device_type.to_ascii_lowercase().starts_with("cisco")
    }
}

impl std::fmt::Debug for ConnectionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCredential")
            .field("host", &self.host)
            .field("device_type", &self.device_type)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("secret", &"<redacted>")
            .finish()
    }
}

//! Transport abstraction for interactive device CLI sessions.
//!
//! A [`Connector`] opens authenticated sessions; a [`Transport`] is one open
//! session that exchanges text with the device. Two implementations ship:
//!
//! - `SshConnector`: `russh` client session with a PTY and interactive shell
//! - `SimulatedConnector`: scripted in-memory devices for tests and dry runs
//!
//! Timeouts are enforced one level up by `DeviceSession`, so implementations
//! may block for as long as the device takes to answer.

pub mod simulated;
pub mod ssh;

pub use simulated::{DeviceProfile, SimulatedConnector, SimulationStats};
pub use ssh::SshConnector;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ConnectionCredential;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Unsupported device type '{0}'")]
    UnsupportedDeviceType(String),

    #[error("Device rejected '{command}': {output}")]
    CommandRejected { command: String, output: String },

    #[error("Timeout waiting for device prompt")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

impl TransportError {
    /// Whether the session is unusable after this error.
    ///
    /// A rejected command leaves the CLI at its prompt; everything else means
    /// the channel is gone or in an unknown state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::CommandRejected { .. })
    }
}

/// One open, authenticated CLI session.
///
/// Operations on a single transport are strictly sequential (`&mut self`);
/// a transport is never shared between tasks.
#[async_trait]
pub trait Transport: Send {
    /// Whether the underlying channel is still usable.
    fn is_alive(&mut self) -> bool;

    /// Send one exec-mode command and return its output without the echo
    /// and the trailing prompt.
    async fn send_command(&mut self, command: &str) -> Result<String, TransportError>;

    /// Enter configuration mode, send `lines` in order, leave configuration
    /// mode. Returns the accumulated device output.
    async fn send_config_batch(&mut self, lines: &[String]) -> Result<String, TransportError>;

    /// Close the session. Must tolerate being called on a dead channel.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports from credentials.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(
        &self,
        credential: &ConnectionCredential,
    ) -> Result<Box<dyn Transport>, TransportError>;

    /// Human-readable name for logging (e.g. "ssh", "simulated").
    fn connector_name(&self) -> &str;
}

/// Device messages that mark a command as not accepted.
pub(crate) const REJECTION_MARKERS: &[&str] = &[
    "% Invalid input",
    "% Incomplete command",
    "% Ambiguous command",
    "% Unknown command",
];

/// Returns the first rejection marker found in `output`, if any.
pub(crate) fn rejection_in(output: &str) -> Option<&'static str> {
    REJECTION_MARKERS
        .iter()
        .copied()
        .find(|marker| output.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_command_is_not_fatal() {
        let err = TransportError::CommandRejected {
            command: "show bogus".to_string(),
            output: "% Invalid input detected".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(TransportError::Timeout.is_fatal());
        assert!(TransportError::ConnectionClosed.is_fatal());
    }

    #[test]
    fn test_rejection_markers() {
        assert_eq!(
            rejection_in("foo\n% Invalid input detected at '^' marker."),
            Some("% Invalid input")
        );
        assert_eq!(rejection_in("Clock is synchronized"), None);
    }
}

//! Device session: connection lifecycle plus lazily derived, memoized facts.
//!
//! A `DeviceSession` is owned by exactly one task. All operations take
//! `&mut self`, so commands on one device are strictly sequential.
//!
//! ## Fact caching
//!
//! Every fact except NTP state is derived at most once: the first successful
//! query is parsed and the result (including "not found") is kept for the
//! lifetime of the session. Failed queries cache nothing, so the next call
//! retries. An empty CDP answer yields `CdpStatus::Unknown`, which is not
//! cached either.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::commands;
use super::facts::{self, CdpStatus, VersionFacts};
use crate::config::defaults::{COMMAND_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS};
use crate::transport::{Connector, Transport, TransportError};
use crate::types::ConnectionCredential;

/// Session-level errors. Always name the host.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{host}: connection failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("{host}: {operation} timed out after {after:?}")]
    Timeout {
        host: String,
        operation: String,
        after: Duration,
    },

    /// The device answered but refused the command. The session stays usable.
    #[error("{host}: device rejected '{command}': {reason}")]
    CommandRejected {
        host: String,
        command: String,
        reason: String,
    },
}

impl SessionError {
    /// True for refusals reported by the device itself.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SessionError::CommandRejected { .. })
    }
}

/// Timeouts applied at the session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Default)]
struct FactCache {
    version: Option<VersionFacts>,
    /// Outer `None`: never derived. Inner `None`: no hostname directive.
    hostname: Option<Option<String>>,
    cdp: Option<CdpStatus>,
    cdp_peers: Option<usize>,
}

/// One managed device.
pub struct DeviceSession {
    credential: ConnectionCredential,
    connector: Arc<dyn Connector>,
    settings: SessionSettings,
    transport: Option<Box<dyn Transport>>,
    facts: FactCache,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("credential", &self.credential)
            .field("connector", &self.connector.connector_name())
            .field("connected", &self.transport.is_some())
            .field("facts", &self.facts)
            .finish()
    }
}

impl DeviceSession {
    pub fn new(
        credential: ConnectionCredential,
        connector: Arc<dyn Connector>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            credential,
            connector,
            settings,
            transport: None,
            facts: FactCache::default(),
        }
    }

    pub fn host(&self) -> &str {
        &self.credential.host
    }

    pub fn credential(&self) -> &ConnectionCredential {
        &self.credential
    }

    /// Whether a transport handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Make sure a usable transport is held, opening one if needed.
    ///
    /// A live handle is reused as-is. A dead one is closed and replaced.
    pub async fn ensure_connected(&mut self) -> Result<(), SessionError> {
        if let Some(transport) = self.transport.as_mut() {
            if transport.is_alive() {
                return Ok(());
            }
            debug!(host = %self.credential.host, "Transport no longer alive, reconnecting");
            self.drop_transport().await;
        }

        let limit = self.settings.connect_timeout;
        match timeout(
            limit,
            self.connector.open(&self.credential),
        )
        .await
        {
            Ok(Ok(transport)) => {
                info!(
                    host = %self.credential.host,
                    transport = self.connector.connector_name(),
                    "Connected"
                );
                self.transport = Some(transport);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(host = %self.credential.host, error = %e, "Connection failed");
                Err(SessionError::Connection {
                    host: self.credential.host.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(host = %self.credential.host, timeout = ?limit, "Connection timed out");
                Err(SessionError::Timeout {
                    host: self.credential.host.clone(),
                    operation: "connect".to_string(),
                    after: limit,
                })
            }
        }
    }

    /// True if a session is usable afterwards. Failures are logged, never raised.
    pub async fn connect(&mut self) -> bool {
        self.ensure_connected().await.is_ok()
    }

    /// Close the transport if one is held. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if self.transport.is_some() {
            self.drop_transport().await;
            info!(host = %self.credential.host, "Disconnected");
        }
    }

    async fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match timeout(self.settings.connect_timeout, transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(host = %self.credential.host, error = %e, "Error while closing transport");
                }
                Err(_) => {
                    debug!(host = %self.credential.host, "Timed out closing transport");
                }
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Run one exec-mode command, connecting first if needed.
    ///
    /// Timeouts and channel errors drop the transport; the next call
    /// reconnects. A device refusal keeps the transport.
    pub async fn send_command(&mut self, command: &str) -> Result<String, SessionError> {
        self.ensure_connected().await?;
        debug!(host = %self.credential.host, command, "Sending command");

        let limit = self.settings.command_timeout;
        let result = match self.transport.as_mut() {
            Some(transport) => timeout(limit, transport.send_command(command)).await,
            None => return Err(self.not_connected()),
        };
        self.settle(command, result).await
    }

    /// Push configuration lines as one batch. Not transactional: lines the
    /// device accepted before a failure stay applied.
    pub async fn push_config(&mut self, lines: &[String]) -> Result<String, SessionError> {
        self.ensure_connected().await?;
        debug!(host = %self.credential.host, lines = lines.len(), "Pushing configuration");

        let limit = self.settings.command_timeout;
        let result = match self.transport.as_mut() {
            Some(transport) => timeout(limit, transport.send_config_batch(lines)).await,
            None => return Err(self.not_connected()),
        };
        self.settle("configuration batch", result).await
    }

    /// Map a timed transport call to a session result, dropping the
    /// transport when the channel can no longer be trusted.
    async fn settle(
        &mut self,
        operation: &str,
        result: Result<Result<String, TransportError>, tokio::time::error::Elapsed>,
    ) -> Result<String, SessionError> {
        let host = self.credential.host.clone();
        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if !e.is_fatal() => {
                let (command, reason) = match e {
                    TransportError::CommandRejected { command, output } => {
                        (command, output.trim().to_string())
                    }
                    other => (operation.to_string(), other.to_string()),
                };
                debug!(host = %host, command = %command, "Command rejected by device");
                Err(SessionError::CommandRejected {
                    host,
                    command,
                    reason,
                })
            }
            Ok(Err(e)) => {
                warn!(host = %host, operation, error = %e, "Transport failed, dropping session");
                self.drop_transport().await;
                Err(SessionError::Connection {
                    host,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                let limit = self.settings.command_timeout;
                warn!(host = %host, operation, timeout = ?limit, "Command timed out, dropping session");
                self.drop_transport().await;
                Err(SessionError::Timeout {
                    host,
                    operation: operation.to_string(),
                    after: limit,
                })
            }
        }
    }

    fn not_connected(&self) -> SessionError {
        SessionError::Connection {
            host: self.credential.host.clone(),
            reason: "no transport after connect".to_string(),
        }
    }

    // ========================================================================
    // Facts
    // ========================================================================

    async fn version_facts(&mut self) -> Result<VersionFacts, SessionError> {
        if let Some(cached) = &self.facts.version {
            return Ok(cached.clone());
        }
        let output = self.send_command(commands::SHOW_VERSION).await?;
        let parsed = facts::parse_show_version(&output);
        if parsed.ios_version.is_none() {
            debug!(host = %self.credential.host, "No IOS version in show version output");
        }
        self.facts.version = Some(parsed.clone());
        Ok(parsed)
    }

    pub async fn ios_version(&mut self) -> Result<Option<String>, SessionError> {
        Ok(self.version_facts().await?.ios_version)
    }

    pub async fn hardware_type(&mut self) -> Result<Option<String>, SessionError> {
        Ok(self.version_facts().await?.hardware_type)
    }

    /// Only ever derived from a successful show-version query.
    pub async fn is_npe(&mut self) -> Result<bool, SessionError> {
        Ok(self.version_facts().await?.is_npe)
    }

    pub async fn hostname(&mut self) -> Result<Option<String>, SessionError> {
        if let Some(cached) = &self.facts.hostname {
            return Ok(cached.clone());
        }
        let output = self.send_command(commands::SHOW_HOSTNAME).await?;
        let hostname = facts::parse_hostname(&output);
        self.facts.hostname = Some(hostname.clone());
        Ok(hostname)
    }

    /// Global CDP state. A device that refuses `show cdp` reports `Unknown`.
    pub async fn cdp_status(&mut self) -> Result<CdpStatus, SessionError> {
        if let Some(cached) = self.facts.cdp {
            return Ok(cached);
        }
        let status = match self.send_command(commands::SHOW_CDP).await {
            Ok(output) => facts::parse_cdp_status(&output),
            Err(e) if e.is_rejection() => CdpStatus::Unknown,
            Err(e) => return Err(e),
        };
        if status == CdpStatus::Unknown {
            debug!(host = %self.credential.host, "CDP state undetermined");
        } else {
            self.facts.cdp = Some(status);
        }
        Ok(status)
    }

    pub async fn is_cdp_enabled(&mut self) -> Result<bool, SessionError> {
        Ok(self.cdp_status().await?.is_enabled())
    }

    /// Number of CDP neighbors; `None` when CDP is not enabled (no neighbor
    /// query is sent) or the device refused the neighbor listing.
    pub async fn cdp_peer_count(&mut self) -> Result<Option<usize>, SessionError> {
        if let Some(cached) = self.facts.cdp_peers {
            return Ok(Some(cached));
        }
        let status = self.cdp_status().await?;
        self.cdp_peers_for(status).await
    }

    /// `cdp_peer_count` for a CDP status the caller already holds; never
    /// re-sends `show cdp`.
    pub async fn cdp_peers_for(&mut self, status: CdpStatus) -> Result<Option<usize>, SessionError> {
        if let Some(cached) = self.facts.cdp_peers {
            return Ok(Some(cached));
        }
        if !status.is_enabled() {
            return Ok(None);
        }
        match self.send_command(commands::SHOW_CDP_NEIGHBORS).await {
            Ok(output) => {
                let peers = facts::count_cdp_peers(&output);
                self.facts.cdp_peers = Some(peers);
                Ok(Some(peers))
            }
            Err(e) if e.is_rejection() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Re-queried on every call. Any failure reads as "not synchronized".
    pub async fn is_ntp_synchronized(&mut self) -> bool {
        match self.send_command(commands::SHOW_NTP_STATUS).await {
            Ok(output) => facts::parse_ntp_synchronized(&output),
            Err(e) => {
                debug!(host = %self.credential.host, error = %e, "NTP status query failed");
                false
            }
        }
    }

    /// Full running configuration. Never cached.
    pub async fn running_config(&mut self) -> Result<String, SessionError> {
        self.send_command(commands::SHOW_RUNNING_CONFIG).await
    }

    /// Ping `address` from the device; true only at a 100% success rate.
    pub async fn is_host_reachable(&mut self, address: &str) -> Result<bool, SessionError> {
        match self.send_command(&commands::ping(address)).await {
            Ok(output) => Ok(facts::parse_ping_success(&output)),
            Err(e) if e.is_rejection() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DeviceProfile, SimulatedConnector, SimulationStats};

    const HOST: &str = "10.0.0.1";

    fn credential() -> ConnectionCredential {
        ConnectionCredential {
            host: HOST.to_string(),
            device_type: "cisco_ios".to_string(),
            username: "admin".to_string(),
            password: "pw".to_string(),
            port: 22,
            secret: "en".to_string(),
        }
    }

    fn router() -> DeviceProfile {
        DeviceProfile::cisco_router(
            "edge-rtr-01",
            "CISCO2911/K9",
            "15.4(3)M2",
            "c2900-universalk9_npe-mz.SPA.154-3.M2.bin",
        )
    }

    fn session_with(profile: DeviceProfile) -> (DeviceSession, SimulationStats) {
        let connector = SimulatedConnector::new().with_device(HOST, profile);
        let stats = connector.stats();
        let session = DeviceSession::new(credential(), Arc::new(connector), SessionSettings::default());
        (session, stats)
    }

    #[tokio::test]
    async fn test_version_facts_are_memoized() {
        let (mut session, stats) = session_with(router());

        assert_eq!(session.ios_version().await.unwrap().as_deref(), Some("15.4(3)M2"));
        assert_eq!(session.hardware_type().await.unwrap().as_deref(), Some("CISCO2911/K9"));
        assert!(session.is_npe().await.unwrap());
        assert_eq!(session.ios_version().await.unwrap().as_deref(), Some("15.4(3)M2"));

        assert_eq!(stats.command_count(HOST, commands::SHOW_VERSION), 1);
    }

    #[tokio::test]
    async fn test_hostname_memoized() {
        let (mut session, stats) = session_with(router());

        assert_eq!(session.hostname().await.unwrap().as_deref(), Some("edge-rtr-01"));
        let sent = stats.commands(HOST).len();
        assert_eq!(session.hostname().await.unwrap().as_deref(), Some("edge-rtr-01"));
        assert_eq!(stats.commands(HOST).len(), sent);
    }

    #[tokio::test]
    async fn test_parse_miss_is_cached_as_unknown() {
        let profile = DeviceProfile::new().with_response(commands::SHOW_HOSTNAME, "");
        let (mut session, stats) = session_with(profile);

        assert_eq!(session.hostname().await.unwrap(), None);
        assert_eq!(session.hostname().await.unwrap(), None);
        assert_eq!(stats.command_count(HOST, commands::SHOW_HOSTNAME), 1);
    }

    #[tokio::test]
    async fn test_ntp_requeried_every_call() {
        let (mut session, stats) = session_with(router().with_ntp_synchronized(true));

        assert!(session.is_ntp_synchronized().await);
        assert!(session.is_ntp_synchronized().await);
        assert_eq!(stats.command_count(HOST, commands::SHOW_NTP_STATUS), 2);
    }

    #[tokio::test]
    async fn test_ntp_failure_reads_as_unsynchronized() {
        let (mut session, _) = session_with(DeviceProfile::new());
        assert!(!session.is_ntp_synchronized().await);
    }

    #[tokio::test]
    async fn test_cdp_disabled_skips_neighbor_query() {
        let (mut session, stats) = session_with(router().with_cdp_disabled());

        assert!(!session.is_cdp_enabled().await.unwrap());
        let sent = stats.commands(HOST).len();

        assert_eq!(session.cdp_peer_count().await.unwrap(), None);
        assert_eq!(stats.commands(HOST).len(), sent);
        assert_eq!(stats.command_count(HOST, commands::SHOW_CDP_NEIGHBORS), 0);
    }

    #[tokio::test]
    async fn test_cdp_peer_count() {
        let (mut session, stats) = session_with(router().with_cdp_peers(4));

        assert_eq!(session.cdp_peer_count().await.unwrap(), Some(4));
        assert_eq!(session.cdp_peer_count().await.unwrap(), Some(4));
        assert_eq!(stats.command_count(HOST, commands::SHOW_CDP), 1);
        assert_eq!(stats.command_count(HOST, commands::SHOW_CDP_NEIGHBORS), 1);
    }

    #[tokio::test]
    async fn test_empty_cdp_output_is_unknown_and_not_cached() {
        let (mut session, stats) = session_with(router().with_response(commands::SHOW_CDP, ""));

        assert_eq!(session.cdp_status().await.unwrap(), CdpStatus::Unknown);
        assert_eq!(session.cdp_peer_count().await.unwrap(), None);
        assert_eq!(stats.command_count(HOST, commands::SHOW_CDP), 2);
        assert_eq!(stats.command_count(HOST, commands::SHOW_CDP_NEIGHBORS), 0);
    }

    #[tokio::test]
    async fn test_peers_for_known_status_sends_no_cdp_query() {
        let (mut session, stats) = session_with(router().with_response(commands::SHOW_CDP, ""));

        let status = session.cdp_status().await.unwrap();
        assert_eq!(session.cdp_peers_for(status).await.unwrap(), None);
        assert_eq!(stats.command_count(HOST, commands::SHOW_CDP), 1);

        assert_eq!(session.cdp_peers_for(CdpStatus::Enabled).await.unwrap(), Some(0));
        assert_eq!(stats.command_count(HOST, commands::SHOW_CDP), 1);
        assert_eq!(stats.command_count(HOST, commands::SHOW_CDP_NEIGHBORS), 1);
    }

    #[tokio::test]
    async fn test_connect_reuses_live_transport() {
        let (mut session, stats) = session_with(router());

        assert!(session.connect().await);
        assert!(session.connect().await);
        assert_eq!(stats.opens(HOST), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_false() {
        let (mut session, _) = session_with(router().refusing_connections());

        assert!(!session.connect().await);
        assert!(!session.is_connected());
        let err = session.send_command(commands::SHOW_VERSION).await.unwrap_err();
        assert!(matches!(err, SessionError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_reconnects_after_channel_drop() {
        let (mut session, stats) = session_with(router().dropping_after(1));

        session.ios_version().await.unwrap();
        session.hostname().await.unwrap();
        assert_eq!(stats.opens(HOST), 2);
        assert_eq!(stats.closes(HOST), 1);
    }

    #[tokio::test]
    async fn test_rejected_command_keeps_session() {
        let (mut session, stats) = session_with(router());

        let err = session.send_command("show bogus").await.unwrap_err();
        assert!(err.is_rejection());
        assert!(session.is_connected());
        session.ios_version().await.unwrap();
        assert_eq!(stats.opens(HOST), 1);
    }

    #[tokio::test]
    async fn test_command_timeout_drops_transport() {
        let connector = SimulatedConnector::new()
            .with_device(HOST, router().hanging_on(commands::SHOW_VERSION));
        let stats = connector.stats();
        let settings = SessionSettings {
            connect_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_millis(50),
        };
        let mut session = DeviceSession::new(credential(), Arc::new(connector), settings);

        let err = session.ios_version().await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
        assert!(err.to_string().ends_with("timed out after 50ms"), "{err}");
        assert!(!session.is_connected());
        assert_eq!(stats.closes(HOST), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (mut session, stats) = session_with(router());

        session.disconnect().await;
        assert_eq!(stats.closes(HOST), 0);

        assert!(session.connect().await);
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(stats.closes(HOST), 1);
    }

    #[tokio::test]
    async fn test_host_reachability() {
        let (mut session, _) = session_with(
            router()
                .with_reachable("172.16.0.1", true)
                .with_reachable("172.16.0.2", false),
        );

        assert!(session.is_host_reachable("172.16.0.1").await.unwrap());
        assert!(!session.is_host_reachable("172.16.0.2").await.unwrap());
    }

    #[tokio::test]
    async fn test_push_config() {
        let (mut session, stats) = session_with(router());
        let lines = vec!["clock timezone GMT 0".to_string()];

        session.push_config(&lines).await.unwrap();
        assert_eq!(stats.config_batches(HOST), vec![lines]);
    }
}

//! Simulated transport: scripted in-memory devices
//!
//! Each host maps to a [`DeviceProfile`] holding canned command output.
//! Used by the test-suite and by `--simulate` runs. Every open, command,
//! config batch and close is recorded in [`SimulationStats`] so tests can
//! assert exactly what a session sent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::{Connector, Transport, TransportError};
use crate::device::commands;
use crate::types::ConnectionCredential;

const INVALID_INPUT: &str = "% Invalid input detected at '^' marker.";

// ============================================================================
// Device profile
// ============================================================================

/// Canned behaviour of one simulated device.
#[derive(Debug, Clone, Default)]
pub struct DeviceProfile {
    responses: HashMap<String, String>,
    /// Whether `ping` to an address without a scripted answer succeeds
    ping_default_reachable: bool,
    refuse_connections: bool,
    reject_config: bool,
    /// Command that never gets an answer
    hang_on: Option<String>,
    /// Channel reports dead after this many commands
    drop_after_commands: Option<usize>,
}

impl DeviceProfile {
    /// A device that answers nothing; every command is rejected.
    pub fn new() -> Self {
        Self::default()
    }

    /// A Cisco IOS router with CDP enabled (no neighbors), NTP unsynchronized
    /// and unreachable ping targets. Adjust with the `with_*` builders.
    pub fn cisco_router(hostname: &str, model: &str, version: &str, image: &str) -> Self {
        let show_version = format!(
            "Cisco IOS Software, Software (C2900-UNIVERSALK9-M), Version {version}, RELEASE SOFTWARE (fc2)\n\
             System image file is \"flash0:{image}\"\n\
             cisco {model} (revision 1.0) processor with 491520K/32768K bytes of memory."
        );
        let running_config = format!(
            "Building configuration...\n\n\
             Current configuration : 1187 bytes\n\
             !\n\
             version {version}\n\
             service timestamps debug datetime msec\n\
             !\n\
             hostname {hostname}\n\
             !\n\
             interface GigabitEthernet0/0\n \
             ip address dhcp\n\
             !\n\
             end"
        );

        Self::new()
            .with_response(commands::SHOW_VERSION, &show_version)
            .with_response(commands::SHOW_HOSTNAME, &format!("hostname {hostname}"))
            .with_response(commands::SHOW_RUNNING_CONFIG, &running_config)
            .with_cdp_peers(0)
            .with_ntp_synchronized(false)
    }

    /// Script the exact output for `command`.
    pub fn with_response(mut self, command: &str, output: &str) -> Self {
        self.responses
            .insert(command.to_string(), output.to_string());
        self
    }

    /// CDP enabled with `peers` neighbors.
    pub fn with_cdp_peers(self, peers: usize) -> Self {
        let neighbors = (1..=peers)
            .map(|i| format!("Device ID: peer-{i:02}.lab"))
            .collect::<Vec<_>>()
            .join("\n");
        self.with_response(
            commands::SHOW_CDP,
            "Global CDP information:\n\
             \tSending CDP packets every 60 seconds\n\
             \tSending a holdtime value of 180 seconds\n\
             \tSending CDPv2 advertisements is  enabled",
        )
        .with_response(commands::SHOW_CDP_NEIGHBORS, &neighbors)
    }

    pub fn with_cdp_disabled(self) -> Self {
        self.with_response(commands::SHOW_CDP, "% CDP is not enabled")
    }

    pub fn with_ntp_synchronized(self, synchronized: bool) -> Self {
        let line = if synchronized {
            "Clock is synchronized, stratum 3, reference is 172.16.0.1"
        } else {
            "Clock is unsynchronized, stratum 16, no reference clock"
        };
        self.with_response(commands::SHOW_NTP_STATUS, line)
    }

    /// Scripted ping result for one address.
    pub fn with_reachable(self, address: &str, reachable: bool) -> Self {
        let output = ping_output(address, reachable);
        self.with_response(&commands::ping(address), &output)
    }

    /// Answer pings to unscripted addresses with `reachable`.
    pub fn with_default_ping(mut self, reachable: bool) -> Self {
        self.ping_default_reachable = reachable;
        self
    }

    /// Every open attempt fails.
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    /// Configuration batches are rejected by the device.
    pub fn rejecting_config(mut self) -> Self {
        self.reject_config = true;
        self
    }

    /// `command` never returns.
    pub fn hanging_on(mut self, command: &str) -> Self {
        self.hang_on = Some(command.to_string());
        self
    }

    /// The channel dies after `count` commands.
    pub fn dropping_after(mut self, count: usize) -> Self {
        self.drop_after_commands = Some(count);
        self
    }

    /// Randomised router used by `--simulate` runs.
    pub fn synthetic(index: usize) -> Self {
        const MODELS: &[(&str, &str)] = &[
            ("CISCO2911/K9", "c2900-universalk9-mz.SPA.154-3.M2.bin"),
            ("CISCO2911/K9", "c2900-universalk9_npe-mz.SPA.154-3.M2.bin"),
            ("CISCO1941/K9", "c1900-universalk9-mz.SPA.155-3.M4a.bin"),
            ("ISR4331/K9", "isr4300-universalk9.16.09.04.SPA.bin"),
        ];
        const VERSIONS: &[&str] = &["15.4(3)M2", "15.5(3)M4a", "16.9.4"];

        let mut rng = rand::thread_rng();
        let (model, image) = MODELS[rng.gen_range(0..MODELS.len())];
        let version = VERSIONS[rng.gen_range(0..VERSIONS.len())];
        let hostname = format!("sim-rtr-{:02}", index + 1);

        let profile = Self::cisco_router(&hostname, model, version, image)
            .with_ntp_synchronized(rng.gen_bool(0.7))
            .with_default_ping(rng.gen_bool(0.8));

        if rng.gen_bool(0.2) {
            profile.with_cdp_disabled()
        } else {
            profile.with_cdp_peers(rng.gen_range(0..6))
        }
    }

    fn respond(&self, command: &str) -> Option<String> {
        if let Some(output) = self.responses.get(command) {
            return Some(output.clone());
        }
        command
            .strip_prefix("ping ")
            .map(|address| ping_output(address.trim(), self.ping_default_reachable))
    }
}

fn ping_output(address: &str, reachable: bool) -> String {
    let (marks, rate) = if reachable {
        ("!!!!!", "Success rate is 100 percent (5/5), round-trip min/avg/max = 1/2/4 ms")
    } else {
        (".....", "Success rate is 0 percent (0/5)")
    };
    format!(
        "Type escape sequence to abort.\n\
         Sending 5, 100-byte ICMP Echos to {address}, timeout is 2 seconds:\n\
         {marks}\n\
         {rate}"
    )
}

// ============================================================================
// Recorded activity
// ============================================================================

/// What one simulated host saw.
#[derive(Debug, Clone, Default)]
pub struct HostActivity {
    pub opens: usize,
    pub closes: usize,
    pub commands: Vec<String>,
    pub config_batches: Vec<Vec<String>>,
}

/// Shared activity log, cloneable into every transport.
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    hosts: Arc<Mutex<HashMap<String, HostActivity>>>,
}

impl SimulationStats {
    fn record(&self, host: &str, update: impl FnOnce(&mut HostActivity)) {
        if let Ok(mut hosts) = self.hosts.lock() {
            update(hosts.entry(host.to_string()).or_default());
        }
    }

    /// Snapshot of one host's activity (empty if never contacted).
    pub fn host(&self, host: &str) -> HostActivity {
        self.hosts
            .lock()
            .ok()
            .and_then(|hosts| hosts.get(host).cloned())
            .unwrap_or_default()
    }

    pub fn opens(&self, host: &str) -> usize {
        self.host(host).opens
    }

    pub fn closes(&self, host: &str) -> usize {
        self.host(host).closes
    }

    pub fn commands(&self, host: &str) -> Vec<String> {
        self.host(host).commands
    }

    /// How often `command` was sent to `host`.
    pub fn command_count(&self, host: &str, command: &str) -> usize {
        self.host(host)
            .commands
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    pub fn config_batches(&self, host: &str) -> Vec<Vec<String>> {
        self.host(host).config_batches
    }
}

// ============================================================================
// Connector / transport
// ============================================================================

/// Connector over a fixed set of scripted hosts.
#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    profiles: HashMap<String, Arc<DeviceProfile>>,
    /// Inclusive per-operation latency range in milliseconds
    latency_ms: Option<(u64, u64)>,
    stats: SimulationStats,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Random profiles for every credential (used by `--simulate`).
    pub fn synthetic(credentials: &[ConnectionCredential]) -> Self {
        credentials
            .iter()
            .enumerate()
            .fold(Self::new(), |connector, (i, cred)| {
                connector.with_device(&cred.host, DeviceProfile::synthetic(i))
            })
    }

    pub fn with_device(mut self, host: &str, profile: DeviceProfile) -> Self {
        self.profiles.insert(host.to_string(), Arc::new(profile));
        self
    }

    /// Sleep a random duration in `[min_ms, max_ms]` before every operation.
    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = Some((min_ms.min(max_ms), min_ms.max(max_ms)));
        self
    }

    /// Handle to the activity log shared by all transports of this connector.
    pub fn stats(&self) -> SimulationStats {
        self.stats.clone()
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn open(
        &self,
        credential: &ConnectionCredential,
    ) -> Result<Box<dyn Transport>, TransportError> {
        simulate_latency(self.latency_ms).await;
        self.stats.record(&credential.host, |a| a.opens += 1);

        let profile = self.profiles.get(&credential.host).ok_or_else(|| {
            TransportError::ConnectionFailed(format!("no route to host {}", credential.host))
        })?;
        if profile.refuse_connections {
            return Err(TransportError::ConnectionFailed(format!(
                "connection refused by {}",
                credential.endpoint()
            )));
        }

        debug!(host = %credential.host, "Simulated session opened");
        Ok(Box::new(SimulatedTransport {
            host: credential.host.clone(),
            profile: Arc::clone(profile),
            stats: self.stats.clone(),
            latency_ms: self.latency_ms,
            alive: true,
            commands_sent: 0,
        }))
    }

    fn connector_name(&self) -> &str {
        "simulated"
    }
}

struct SimulatedTransport {
    host: String,
    profile: Arc<DeviceProfile>,
    stats: SimulationStats,
    latency_ms: Option<(u64, u64)>,
    alive: bool,
    commands_sent: usize,
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn is_alive(&mut self) -> bool {
        if let Some(limit) = self.profile.drop_after_commands {
            if self.commands_sent >= limit {
                self.alive = false;
            }
        }
        self.alive
    }

    async fn send_command(&mut self, command: &str) -> Result<String, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionClosed);
        }
        simulate_latency(self.latency_ms).await;
        self.commands_sent += 1;
        self.stats
            .record(&self.host, |a| a.commands.push(command.to_string()));

        if self.profile.hang_on.as_deref() == Some(command) {
            std::future::pending::<()>().await;
        }

        self.profile
            .respond(command)
            .ok_or_else(|| TransportError::CommandRejected {
                command: command.to_string(),
                output: INVALID_INPUT.to_string(),
            })
    }

    async fn send_config_batch(&mut self, lines: &[String]) -> Result<String, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionClosed);
        }
        simulate_latency(self.latency_ms).await;
        self.stats
            .record(&self.host, |a| a.config_batches.push(lines.to_vec()));

        if self.profile.reject_config {
            return Err(TransportError::CommandRejected {
                command: lines.first().cloned().unwrap_or_default(),
                output: INVALID_INPUT.to_string(),
            });
        }

        let mut output =
            String::from("Enter configuration commands, one per line.  End with CNTL/Z.\n");
        for line in lines {
            output.push_str(&format!("{}(config)#{}\n", self.host, line));
        }
        output.push_str(&format!("{}(config)#end", self.host));
        Ok(output)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.alive = false;
        self.stats.record(&self.host, |a| a.closes += 1);
        Ok(())
    }
}

async fn simulate_latency(latency_ms: Option<(u64, u64)>) {
    if let Some((min, max)) = latency_ms {
        let delay = rand::thread_rng().gen_range(min..=max);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(host: &str) -> ConnectionCredential {
        ConnectionCredential {
            host: host.to_string(),
            device_type: "cisco_ios".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            port: 22,
            secret: "enable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_host_fails_to_open() {
        let connector = SimulatedConnector::new();
        let result = connector.open(&credential("10.9.9.9")).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert_eq!(connector.stats().opens("10.9.9.9"), 1);
    }

    #[tokio::test]
    async fn test_scripted_responses_and_rejections() {
        let connector = SimulatedConnector::new().with_device(
            "10.0.0.1",
            DeviceProfile::cisco_router("r1", "CISCO2911/K9", "15.4(3)M2", "c2900.bin"),
        );
        let mut transport = connector.open(&credential("10.0.0.1")).await.expect("open");

        let out = transport
            .send_command(commands::SHOW_HOSTNAME)
            .await
            .expect("hostname");
        assert_eq!(out, "hostname r1");

        let rejected = transport.send_command("show bogus").await;
        assert!(matches!(
            rejected,
            Err(TransportError::CommandRejected { .. })
        ));

        let stats = connector.stats();
        assert_eq!(stats.commands("10.0.0.1").len(), 2);
    }

    #[tokio::test]
    async fn test_ping_defaults() {
        let connector = SimulatedConnector::new().with_device(
            "10.0.0.1",
            DeviceProfile::new()
                .with_default_ping(true)
                .with_reachable("192.0.2.1", false),
        );
        let mut transport = connector.open(&credential("10.0.0.1")).await.expect("open");

        let ok = transport.send_command("ping 198.51.100.7").await.expect("ping");
        assert!(ok.contains("Success rate is 100 percent"));
        let blocked = transport.send_command("ping 192.0.2.1").await.expect("ping");
        assert!(blocked.contains("Success rate is 0 percent"));
    }

    #[tokio::test]
    async fn test_channel_drops_after_limit() {
        let connector = SimulatedConnector::new()
            .with_device("10.0.0.1", DeviceProfile::new().with_default_ping(true).dropping_after(1));
        let mut transport = connector.open(&credential("10.0.0.1")).await.expect("open");

        assert!(transport.is_alive());
        transport.send_command("ping 10.0.0.2").await.expect("first");
        assert!(!transport.is_alive());
        assert!(matches!(
            transport.send_command("ping 10.0.0.2").await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_config_batch_recorded() {
        let connector = SimulatedConnector::new().with_device("10.0.0.1", DeviceProfile::new());
        let mut transport = connector.open(&credential("10.0.0.1")).await.expect("open");
        let lines = vec!["ntp server 172.16.0.1".to_string()];

        let out = transport.send_config_batch(&lines).await.expect("push");
        assert!(out.contains("ntp server 172.16.0.1"));
        assert_eq!(connector.stats().config_batches("10.0.0.1"), vec![lines]);

        transport.close().await.expect("close");
        assert!(!transport.is_alive());
        assert_eq!(connector.stats().closes("10.0.0.1"), 1);
    }

    #[test]
    fn test_synthetic_profile_answers_core_queries() {
        let profile = DeviceProfile::synthetic(0);
        assert!(profile.respond(commands::SHOW_VERSION).is_some());
        assert!(profile.respond(commands::SHOW_CDP).is_some());
        assert!(profile.respond(commands::SHOW_NTP_STATUS).is_some());
        assert_eq!(
            profile.respond(commands::SHOW_HOSTNAME).as_deref(),
            Some("hostname sim-rtr-01")
        );
    }
}

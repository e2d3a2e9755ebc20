//! SSH transport built on `russh`
//!
//! Opens a session, authenticates with the credential password, requests a
//! PTY plus an interactive shell and drives the device CLI as a human would:
//! wait for the prompt, `enable` with the secret if the prompt ends in `>`,
//! disable paging, then exchange one command at a time.
//!
//! Host keys are checked against `~/.ssh/known_hosts` unless verification
//! is switched off (`settings.verify_host_keys = false`).
//!
//! Prompt detection: the last line of the buffered output looks like
//! `router>`, `router#` or `router(config)#`.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tracing::{debug, info, warn};

use super::{rejection_in, Connector, Transport, TransportError};
use crate::config::defaults::SSH_PROMPT_TIMEOUT_SECS;
use crate::types::ConnectionCredential;

/// Longest output kept while waiting for a prompt (bytes).
const MAX_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// PTY geometry; wide enough that IOS never wraps command echoes.
const PTY_COLUMNS: u32 = 511;
const PTY_ROWS: u32 = 24;

fn prompt_regex() -> &'static Regex {
    static PROMPT: OnceLock<Regex> = OnceLock::new();
    PROMPT.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._@/:\-]+(?:\([A-Za-z0-9.\-]+\))?[>#]\s*$")
            .expect("prompt pattern is valid")
    })
}

/// Connector opening `russh` client sessions.
#[derive(Debug, Clone)]
pub struct SshConnector {
    verify_host_keys: bool,
    /// Upper bound on a single wait for the device prompt
    prompt_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            verify_host_keys: true,
            prompt_timeout: Duration::from_secs(SSH_PROMPT_TIMEOUT_SECS),
        }
    }
}

impl SshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept any server key when `verify` is false.
    pub fn with_host_key_verification(mut self, verify: bool) -> Self {
        self.verify_host_keys = verify;
        self
    }

    fn client_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            inactivity_timeout: Some(self.prompt_timeout),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(
        &self,
        credential: &ConnectionCredential,
    ) -> Result<Box<dyn Transport>, TransportError> {
        if !credential.is_cisco_dialect() {
            return Err(TransportError::UnsupportedDeviceType(
                credential.device_type.clone(),
            ));
        }

        info!(endpoint = %credential.endpoint(), "Opening SSH session");
        let checker = HostKeyCheck {
            host: credential.host.clone(),
            port: credential.port,
            verify: self.verify_host_keys,
        };
        let mut handle = client::connect(
            self.client_config(),
            (credential.host.as_str(), credential.port),
            checker,
        )
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let accepted = handle
            .authenticate_password(credential.username.as_str(), credential.password.as_str())
            .await?;
        if !accepted {
            return Err(TransportError::AuthenticationFailed(format!(
                "password rejected for user '{}'",
                credential.username
            )));
        }

        let channel = handle.channel_open_session().await?;
        channel
            .request_pty(false, "vt100", PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;

        let mut transport = SshTransport {
            handle,
            channel,
            prompt_timeout: self.prompt_timeout,
            closed: false,
        };

        let banner = transport.read_until_prompt().await?;
        if last_line(&banner).trim_end().ends_with('>') {
            transport.enable(&credential.secret).await?;
        }
        transport.send_command("terminal length 0").await?;

        debug!(host = %credential.host, "SSH session ready");
        Ok(Box::new(transport))
    }

    fn connector_name(&self) -> &str {
        "ssh"
    }
}

/// Server key check run by `russh` during the handshake.
struct HostKeyCheck {
    host: String,
    port: u16,
    verify: bool,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.verify {
            return Ok(true);
        }
        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(host = %self.host, "Host key not found in known_hosts");
                Ok(false)
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "Host key rejected");
                Ok(false)
            }
        }
    }
}

struct SshTransport {
    handle: Handle<HostKeyCheck>,
    channel: Channel<Msg>,
    prompt_timeout: Duration,
    closed: bool,
}

impl SshTransport {
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let payload = format!("{line}\n");
        if let Err(e) = self.channel.data(payload.as_bytes()).await {
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read shell output until `done(buffer)` holds.
    async fn read_until<F>(&mut self, done: F) -> Result<String, TransportError>
    where
        F: Fn(&str) -> bool + Send,
    {
        let mut buffer: Vec<u8> = Vec::with_capacity(4096);

        loop {
            let message = tokio::time::timeout(self.prompt_timeout, self.channel.wait())
                .await
                .map_err(|_| TransportError::Timeout)?;

            match message {
                Some(ChannelMsg::Data { ref data })
                | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    buffer.extend_from_slice(data);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.closed = true;
                    return Err(TransportError::ConnectionClosed);
                }
                Some(_) => continue,
            }

            if buffer.len() > MAX_BUFFER_BYTES {
                return Err(TransportError::ConnectionFailed(
                    "device output exceeded buffer limit".to_string(),
                ));
            }

            let text = String::from_utf8_lossy(&buffer).replace('\r', "");
            if done(&text) {
                return Ok(text);
            }
        }
    }

    async fn read_until_prompt(&mut self) -> Result<String, TransportError> {
        self.read_until(|text| prompt_regex().is_match(last_line(text)))
            .await
    }

    /// Enter privileged exec mode.
    async fn enable(&mut self, secret: &str) -> Result<(), TransportError> {
        self.write_line("enable").await?;
        let reply = self
            .read_until(|text| {
                text.trim_end().ends_with("assword:") || prompt_regex().is_match(last_line(text))
            })
            .await?;

        let reply = if reply.trim_end().ends_with("assword:") {
            self.write_line(secret).await?;
            self.read_until_prompt().await?
        } else {
            reply
        };

        if last_line(&reply).trim_end().ends_with('#') {
            Ok(())
        } else {
            Err(TransportError::AuthenticationFailed(
                "enable secret rejected".to_string(),
            ))
        }
    }

    async fn exchange(&mut self, command: &str) -> Result<String, TransportError> {
        self.write_line(command).await?;
        let raw = self.read_until_prompt().await?;
        Ok(strip_echo_and_prompt(&raw, command))
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn is_alive(&mut self) -> bool {
        !self.closed
    }

    async fn send_command(&mut self, command: &str) -> Result<String, TransportError> {
        let output = self.exchange(command).await?;
        match rejection_in(&output) {
            Some(_) => Err(TransportError::CommandRejected {
                command: command.to_string(),
                output,
            }),
            None => Ok(output),
        }
    }

    async fn send_config_batch(&mut self, lines: &[String]) -> Result<String, TransportError> {
        let mut transcript = self.exchange("configure terminal").await?;
        let mut rejected: Option<(String, String)> = None;

        for line in lines {
            let output = self.exchange(line).await?;
            if rejected.is_none() && rejection_in(&output).is_some() {
                rejected = Some((line.clone(), output.clone()));
            }
            transcript.push('\n');
            transcript.push_str(&output);
        }

        // Leave config mode even after a rejected line.
        let tail = self.exchange("end").await?;
        transcript.push_str(&tail);

        match rejected {
            Some((command, output)) => {
                warn!(command = %command, "Configuration line rejected by device");
                Err(TransportError::CommandRejected { command, output })
            }
            None => Ok(transcript),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            let _ = self.write_line("exit").await;
            let _ = self.channel.eof().await;
        }
        self.closed = true;
        // Fails only when the connection is already gone.
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "SSH disconnect on a closed connection");
        }
        Ok(())
    }
}

fn last_line(text: &str) -> &str {
    text.rsplit('\n').next().unwrap_or(text)
}

/// Drop the echoed command (first line) and the trailing prompt line.
fn strip_echo_and_prompt(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();

    if lines
        .last()
        .is_some_and(|l| prompt_regex().is_match(l))
    {
        lines.pop();
    }
    if let Some(pos) = lines.iter().position(|l| l.trim_end().ends_with(command.trim())) {
        if pos <= 1 {
            lines.drain(..=pos);
        }
    }

    lines.join("\n").trim_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_detection() {
        let re = prompt_regex();
        assert!(re.is_match("edge-rtr-01#"));
        assert!(re.is_match("edge-rtr-01>"));
        assert!(re.is_match("edge-rtr-01(config)#"));
        assert!(re.is_match("edge-rtr-01(config-if)# "));
        assert!(!re.is_match("Success rate is 100 percent (5/5)"));
        assert!(!re.is_match("Password:"));
    }

    #[test]
    fn test_strip_echo_and_prompt() {
        let raw = "show ntp status | include Clock is\nClock is synchronized, stratum 3\nedge-rtr-01#";
        assert_eq!(
            strip_echo_and_prompt(raw, "show ntp status | include Clock is"),
            "Clock is synchronized, stratum 3"
        );
    }

    #[test]
    fn test_strip_keeps_output_without_echo() {
        let raw = "Clock is unsynchronized\nedge-rtr-01#";
        assert_eq!(
            strip_echo_and_prompt(raw, "show ntp status"),
            "Clock is unsynchronized"
        );
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("a\nb\nrouter#"), "router#");
        assert_eq!(last_line("router>"), "router>");
    }

    #[test]
    fn test_host_keys_verified_by_default() {
        assert!(SshConnector::new().verify_host_keys);
        assert!(!SshConnector::new().with_host_key_verification(false).verify_host_keys);
    }

    #[tokio::test]
    async fn test_rejects_non_cisco_dialect() {
        let cred = ConnectionCredential {
            host: "10.0.0.1".to_string(),
            device_type: "juniper_junos".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            port: 22,
            secret: String::new(),
        };
        let result = SshConnector::new().open(&cred).await;
        assert!(matches!(
            result,
            Err(TransportError::UnsupportedDeviceType(t)) if t == "juniper_junos"
        ));
    }
}

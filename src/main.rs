//! netfleet - fleet fact gathering, backup and policy push
//!
//! Connects to every device in the inventory (bounded concurrency), collects
//! version/hardware/CDP/NTP facts, backs up the running configuration,
//! applies the configured policy rule and prints one summary line per
//! device as it completes.
//!
//! # Usage
//!
//! ```bash
//! # Run against ./netfleet.toml
//! netfleet
//!
//! # Dry run against synthetic devices
//! netfleet --simulate --config fleet.toml
//!
//! # Read-only audit, JSON lines output
//! netfleet --no-policy --json
//! ```
//!
//! # Environment Variables
//!
//! - `NETFLEET_CONFIG`: Path to the TOML config (default: ./netfleet.toml)
//! - `NETFLEET_PASSWORD` / `NETFLEET_SECRET`: Override the credential template
//! - `RUST_LOG`: Logging level (default: info, or debug with `--debug`)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use netfleet::backup::{BackupStore, FileBackupStore, MemoryBackupStore};
use netfleet::config::FleetConfig;
use netfleet::inventory;
use netfleet::orchestrator::FleetOrchestrator;
use netfleet::transport::{Connector, SimulatedConnector, SshConnector};
use netfleet::types::TaskResult;

/// Latency range of simulated devices (ms).
const SIMULATED_LATENCY_MS: (u64, u64) = (50, 400);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "netfleet")]
#[command(about = "Fact gathering, config backup and policy push for network device fleets")]
#[command(version)]
struct CliArgs {
    /// Path to the fleet config (overrides NETFLEET_CONFIG and ./netfleet.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Maximum number of devices processed concurrently
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Separator between summary fields
    #[arg(long, value_name = "S")]
    delimiter: Option<String>,

    /// Directory receiving running-config backups
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// Verbose logging (ignored when RUST_LOG is set)
    #[arg(long)]
    debug: bool,

    /// Print one JSON object per device instead of the summary line
    #[arg(long)]
    json: bool,

    /// Use synthetic simulated devices instead of SSH; backups stay in memory
    #[arg(long)]
    simulate: bool,

    /// Do not evaluate the policy rule or push any configuration
    #[arg(long)]
    no_policy: bool,
}

impl CliArgs {
    /// Command-line values win over the config file.
    fn apply_to(&self, config: &mut FleetConfig) {
        if let Some(workers) = self.workers {
            config.settings.max_workers = workers;
        }
        if let Some(delimiter) = &self.delimiter {
            config.settings.delimiter = delimiter.clone();
        }
        if let Some(dir) = &self.backup_dir {
            config.settings.backup_dir = dir.clone();
        }
        if self.debug {
            config.settings.debug = true;
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Logs go to stderr; stdout carries only device results.
///
/// `RUST_LOG` wins when set. Otherwise the level starts at info (debug with
/// `--debug`) and can be raised once the config file has been read.
fn init_tracing(debug: bool) -> Option<FilterHandle> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let env_set = from_env.is_some();
    let filter =
        from_env.unwrap_or_else(|| EnvFilter::new(if debug { "debug" } else { "info" }));

    let (layer, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    (!env_set).then_some(handle)
}

fn print_result(result: &TaskResult, delimiter: &str, json: bool) {
    if json {
        match serde_json::to_string(result) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(host = %result.host, error = %e, "Failed to serialize result"),
        }
    } else {
        println!("{}", result.render(delimiter));
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let filter_handle = init_tracing(args.debug);

    // Load fleet configuration
    let mut config =
        FleetConfig::load(args.config.as_deref()).context("Failed to load fleet configuration")?;
    config.apply_env_overrides();
    args.apply_to(&mut config);
    config
        .validate()
        .context("Invalid configuration after command-line overrides")?;

    if config.settings.debug && !args.debug {
        if let Some(handle) = &filter_handle {
            if let Err(e) = handle.modify(|filter| *filter = EnvFilter::new("debug")) {
                warn!(error = %e, "Could not raise log level");
            }
        }
    }

    match config.to_toml() {
        Ok(rendered) => debug!("Effective configuration:\n{rendered}"),
        Err(e) => warn!(error = %e, "Could not render effective configuration"),
    }

    let credentials = inventory::device_factory(&config.hosts, &config.defaults);
    if credentials.is_empty() {
        warn!("Inventory is empty, nothing to do. Add [[hosts]] entries to the fleet config.");
        return Ok(());
    }

    let policy = if args.no_policy {
        info!("Policy evaluation disabled (--no-policy)");
        None
    } else {
        config.policy_rule().context("Invalid policy rule")?
    };

    let (connector, backups): (Arc<dyn Connector>, Arc<dyn BackupStore>) = if args.simulate {
        let (min, max) = SIMULATED_LATENCY_MS;
        (
            Arc::new(SimulatedConnector::synthetic(&credentials).with_latency(min, max)),
            Arc::new(MemoryBackupStore::new()),
        )
    } else {
        (
            Arc::new(
                SshConnector::new().with_host_key_verification(config.settings.verify_host_keys),
            ),
            Arc::new(FileBackupStore::new(&config.settings.backup_dir)),
        )
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  netfleet");
    info!("  Devices: {} | Workers: {}", credentials.len(), config.settings.max_workers);
    info!("  Transport: {} | Backups: {}", connector.connector_name(), backups.backend_name());
    match &policy {
        Some(rule) => info!("  Policy: {} -> {} command(s)", rule.predicate, rule.commands.len()),
        None => info!("  Policy: none"),
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let sessions = inventory::build_sessions(credentials, connector, config.session_settings());

    // Ctrl+C stops dispatch of devices that have not started
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Received Ctrl+C, no new devices will be started");
            shutdown_token.cancel();
        }
    });

    let orchestrator = FleetOrchestrator::new(config.settings.max_workers, backups)
        .with_policy(policy)
        .with_cancel_token(cancel_token);

    let delimiter = config.settings.delimiter.clone();
    let report = orchestrator
        .run(sessions, |result| print_result(result, &delimiter, args.json))
        .await;

    info!(
        "✓ Done: {} device(s), {} succeeded, {} failed, policy applied on {}",
        report.total(),
        report.succeeded(),
        report.failed(),
        report.policies_applied()
    );
    Ok(())
}

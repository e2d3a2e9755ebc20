//! One device's end-to-end pipeline.
//!
//! `Connecting → FactGathering → BackingUp → FactGathering →
//! PolicyEvaluating → Disconnecting → Done`. The backup runs as soon as the
//! hostname is known, so a device that stalls on a later fact still leaves
//! its running config behind. Every exit path, including a panic inside
//! the pipeline, goes through `Disconnecting`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backup::{self, BackupStore};
use crate::device::{DeviceSession, SessionError};
use crate::policy::{self, PolicyRule};
use crate::types::{DeviceReport, TaskResult, TaskState};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Shared, read-only inputs of every task.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub policy: Option<Arc<PolicyRule>>,
    pub backups: Arc<dyn BackupStore>,
}

/// Run the pipeline for one device and always produce a result.
pub(crate) async fn process_device(mut session: DeviceSession, ctx: TaskContext) -> TaskResult {
    let host = session.host().to_string();
    let mut state = TaskState::Pending;
    info!(host = %host, "Processing device");

    let outcome = AssertUnwindSafe(run_pipeline(&mut session, &mut state, &ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));

    let failed_in = state;
    state = TaskState::Disconnecting;
    debug!(host = %host, state = %state, "Closing session");
    session.disconnect().await;
    state = TaskState::Done;

    match outcome {
        Ok(report) => {
            info!(host = %host, state = %state, "Device done");
            TaskResult::completed(report)
        }
        Err(e) => {
            error!(host = %host, state = %failed_in, error = %e, "Device failed");
            TaskResult::failed(host, failed_in, e.to_string())
        }
    }
}

async fn run_pipeline(
    session: &mut DeviceSession,
    state: &mut TaskState,
    ctx: &TaskContext,
) -> Result<DeviceReport, TaskError> {
    *state = TaskState::Connecting;
    session.ensure_connected().await?;

    *state = TaskState::FactGathering;
    let ios_version = session.ios_version().await?;
    let hostname = session.hostname().await?;

    *state = TaskState::BackingUp;
    let device_id = hostname.clone().unwrap_or_else(|| session.host().to_string());
    let backup = back_up(session, &device_id, ctx.backups.as_ref()).await?;

    *state = TaskState::FactGathering;
    let hardware_type = session.hardware_type().await?;
    let npe = session.is_npe().await?;
    let cdp = session.cdp_status().await?;
    let cdp_peers = session.cdp_peers_for(cdp).await?;
    debug!(
        host = session.host(),
        hostname = ?hostname,
        ios_version = ?ios_version,
        npe,
        "Facts gathered"
    );

    *state = TaskState::PolicyEvaluating;
    let policy = policy::evaluate(session, ctx.policy.as_deref()).await;
    let ntp_synchronized = session.is_ntp_synchronized().await;

    Ok(DeviceReport {
        host: session.host().to_string(),
        hostname,
        hardware_type,
        ios_version,
        npe,
        cdp,
        cdp_peers,
        ntp_synchronized,
        policy,
        backup,
    })
}

/// Fetch the running config and hand it to the store. Store failures are
/// logged and leave no location; an empty config is not stored.
async fn back_up(
    session: &mut DeviceSession,
    device_id: &str,
    store: &dyn BackupStore,
) -> Result<Option<String>, TaskError> {
    let config = session.running_config().await?;
    if config.trim().is_empty() {
        warn!(host = session.host(), "Empty running config, backup skipped");
        return Ok(None);
    }

    match store.store(device_id, &backup::date_prefix(), &config).await {
        Ok(location) => Ok(Some(location)),
        Err(e) => {
            warn!(host = session.host(), backend = store.backend_name(), error = %e, "Backup failed");
            Ok(None)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

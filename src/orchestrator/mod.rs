//! Fleet orchestrator: bounded fan-out of per-device tasks.
//!
//! Every session becomes one spawned task that waits for a semaphore permit,
//! so at most `max_workers` devices are being worked on at once. Results are
//! collected with `join_next()` and handed to the caller in completion order.
//!
//! Cancellation only stops devices that have not started yet; they are
//! reported as failed in the `Pending` state. Each device yields exactly one
//! result whatever happens to its task.

mod task;

pub use task::TaskError;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backup::BackupStore;
use crate::device::DeviceSession;
use crate::policy::PolicyRule;
use crate::types::{FleetReport, TaskResult, TaskState};
use task::{process_device, TaskContext};

/// Error text recorded for devices that were never started.
pub const CANCELLED: &str = "cancelled before start";

pub struct FleetOrchestrator {
    max_workers: usize,
    policy: Option<Arc<PolicyRule>>,
    backups: Arc<dyn BackupStore>,
    cancel_token: CancellationToken,
}

impl FleetOrchestrator {
    /// `max_workers` below 1 is treated as 1.
    pub fn new(max_workers: usize, backups: Arc<dyn BackupStore>) -> Self {
        Self {
            max_workers: max_workers.max(1),
            policy: None,
            backups,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: Option<PolicyRule>) -> Self {
        self.policy = policy.map(Arc::new);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Stop dispatching devices that have not started.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Process every session; `on_result` sees each result as it completes.
    pub async fn run<F>(&self, sessions: Vec<DeviceSession>, mut on_result: F) -> FleetReport
    where
        F: FnMut(&TaskResult),
    {
        let total = sessions.len();
        info!(devices = total, workers = self.max_workers, "Starting fleet run");

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let ctx = TaskContext {
            policy: self.policy.clone(),
            backups: Arc::clone(&self.backups),
        };

        let mut tasks = JoinSet::new();
        let mut outstanding: HashMap<usize, String> = HashMap::with_capacity(total);

        for (index, session) in sessions.into_iter().enumerate() {
            outstanding.insert(index, session.host().to_string());
            let sem = Arc::clone(&semaphore);
            let token = self.cancel_token.clone();
            let ctx = ctx.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = sem.acquire_owned() => permit.ok(),
                };
                let result = match permit {
                    Some(_permit) if !token.is_cancelled() => process_device(session, ctx).await,
                    _ => {
                        debug!(host = session.host(), "Skipping device, run cancelled");
                        TaskResult::failed(session.host(), TaskState::Pending, CANCELLED)
                    }
                };
                (index, result)
            });
        }

        let mut report = FleetReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    outstanding.remove(&index);
                    on_result(&result);
                    report.results.push(result);
                }
                Err(e) => {
                    error!(error = %e, "Device task aborted");
                }
            }
        }

        // Tasks lost to a JoinError still owe a result.
        let mut lost: Vec<(usize, String)> = outstanding.into_iter().collect();
        lost.sort_unstable_by_key(|(index, _)| *index);
        for (_, host) in lost {
            let result = TaskResult::failed(host, TaskState::Pending, "task aborted");
            on_result(&result);
            report.results.push(result);
        }

        info!(
            total = report.total(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Fleet run finished"
        );
        report
    }
}

//! Per-device task results and the aggregated fleet report.

use serde::{Deserialize, Serialize};

use crate::device::CdpStatus;
use crate::policy::PolicyOutcome;

/// Placeholder rendered for facts that could not be derived.
pub const UNKNOWN_FIELD: &str = "unknown";

// ============================================================================
// Task state machine
// ============================================================================

/// Stage of one device's processing pipeline.
///
/// Facts needed to name the backup file are gathered before `BackingUp`;
/// the rest are gathered after it, so a task passes through
/// `FactGathering` twice. A failure in any stage goes through
/// `Disconnecting` before `Done`, so an opened transport is always closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Connecting,
    FactGathering,
    BackingUp,
    PolicyEvaluating,
    Disconnecting,
    Done,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Connecting => "connecting",
            TaskState::FactGathering => "fact gathering",
            TaskState::BackingUp => "backing up",
            TaskState::PolicyEvaluating => "policy evaluation",
            TaskState::Disconnecting => "disconnecting",
            TaskState::Done => "done",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Device report
// ============================================================================

/// Facts and side-effect outcomes gathered for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    /// Management address from the inventory
    pub host: String,
    pub hostname: Option<String>,
    pub hardware_type: Option<String>,
    pub ios_version: Option<String>,
    /// Boot image carries the `_npe` (no payload encryption) marker
    pub npe: bool,
    pub cdp: CdpStatus,
    /// Only present when CDP is enabled and the neighbor query succeeded
    pub cdp_peers: Option<usize>,
    pub ntp_synchronized: bool,
    pub policy: PolicyOutcome,
    /// Where the running-config backup landed, if one was written
    pub backup: Option<String>,
}

impl DeviceReport {
    /// Render the one-line summary: hostname, hardware, OS version,
    /// NPE/PE marker, CDP line and NTP line joined by `delimiter`.
    pub fn render(&self, delimiter: &str) -> String {
        let npe = if self.npe { "NPE" } else { "PE" };

        let cdp = match self.cdp {
            CdpStatus::Enabled => match self.cdp_peers {
                Some(peers) => format!("CDP is ON, {peers} peers"),
                None => format!("CDP is ON, {UNKNOWN_FIELD} peers"),
            },
            CdpStatus::Disabled => "CDP is OFF".to_string(),
            CdpStatus::Unknown => "CDP state unknown".to_string(),
        };

        let ntp = if self.ntp_synchronized {
            "Clock in Sync"
        } else {
            "Clock not sync"
        };

        [
            self.hostname.as_deref().unwrap_or(UNKNOWN_FIELD),
            self.hardware_type.as_deref().unwrap_or(UNKNOWN_FIELD),
            self.ios_version.as_deref().unwrap_or(UNKNOWN_FIELD),
            npe,
            cdp.as_str(),
            ntp,
        ]
        .join(delimiter)
    }
}

// ============================================================================
// Task result
// ============================================================================

/// How one device's task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(DeviceReport),
    Failed {
        /// Stage the task was in when it failed
        state: TaskState,
        error: String,
    },
}

/// Exactly one of these is produced per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub host: String,
    pub outcome: TaskOutcome,
}

impl TaskResult {
    pub fn completed(report: DeviceReport) -> Self {
        Self {
            host: report.host.clone(),
            outcome: TaskOutcome::Completed(report),
        }
    }

    pub fn failed(host: impl Into<String>, state: TaskState, error: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            outcome: TaskOutcome::Failed {
                state,
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&DeviceReport> {
        match &self.outcome {
            TaskOutcome::Completed(report) => Some(report),
            TaskOutcome::Failed { .. } => None,
        }
    }

    /// Summary line for a completed device, failure description otherwise.
    pub fn render(&self, delimiter: &str) -> String {
        match &self.outcome {
            TaskOutcome::Completed(report) => report.render(delimiter),
            TaskOutcome::Failed { state, error } => {
                format!("{} failed during {}: {}", self.host, state, error)
            }
        }
    }
}

// ============================================================================
// Fleet report
// ============================================================================

/// All task results of one run, in completion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetReport {
    pub results: Vec<TaskResult>,
}

impl FleetReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Devices that accepted the policy push.
    pub fn policies_applied(&self) -> usize {
        self.results
            .iter()
            .filter_map(TaskResult::report)
            .filter(|r| r.policy.is_applied())
            .count()
    }
}

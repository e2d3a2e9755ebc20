//! netfleet: fact gathering, config backup and policy push for fleets of
//! CLI-managed network devices.
//!
//! ## Architecture
//!
//! - **Transport**: authenticated interactive CLI channel (`ssh` or simulated)
//! - **Device Session**: connection lifecycle plus memoized facts parsed from
//!   free-text command output
//! - **Policy**: one declarative predicate → configuration-lines rule
//! - **Backup**: running-config persistence behind the `BackupStore` trait
//! - **Orchestrator**: bounded-concurrency fan-out with per-device fault
//!   isolation, results in completion order

pub mod backup;
pub mod config;
pub mod device;
pub mod inventory;
pub mod orchestrator;
pub mod policy;
pub mod transport;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, FleetConfig};

// Re-export the session and its facts
pub use device::{CdpStatus, DeviceSession, SessionError, SessionSettings};

// Re-export orchestration
pub use orchestrator::{FleetOrchestrator, TaskError};
pub use policy::{Predicate, PolicyOutcome, PolicyRule};

// Re-export commonly used types
pub use types::{ConnectionCredential, DeviceReport, FleetReport, TaskOutcome, TaskResult, TaskState};

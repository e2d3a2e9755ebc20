//! Shared data structures for fleet processing
//!
//! - `ConnectionCredential`: immutable per-device login data
//! - `TaskState` / `TaskResult`: per-device pipeline state and outcome
//! - `DeviceReport` / `FleetReport`: gathered facts and the run aggregate

mod credential;
mod report;

pub use credential::*;
pub use report::*;

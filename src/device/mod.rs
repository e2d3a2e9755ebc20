//! Managed devices: command set, fact extraction and the per-device session.

pub mod commands;
pub mod facts;
mod session;

pub use facts::{CdpStatus, VersionFacts};
pub use session::{DeviceSession, SessionError, SessionSettings};

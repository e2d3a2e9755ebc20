//! Conditional reconfiguration policy.
//!
//! A [`PolicyRule`] is one predicate plus the configuration lines to push
//! when it holds. Predicates are a closed set resolved when the config is
//! loaded; an unknown identifier never reaches a device.
//!
//! ```toml
//! [policy]
//! when = { host_reachable = "172.16.0.1" }
//! then = ["clock timezone GMT 0", "ntp server 172.16.0.1"]
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PolicyConfig;
use crate::device::{DeviceSession, SessionError};

/// Identifiers accepted in `[policy].when`.
pub const PREDICATE_NAMES: &[&str] = &["host_reachable", "ios_version_prefix", "hardware_type"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unknown predicate '{0}' (expected one of: {})", PREDICATE_NAMES.join(", "))]
    UnknownPredicate(String),

    #[error("policy 'when' must name exactly one predicate, found {0}")]
    PredicateCount(usize),

    #[error("predicate '{0}' needs a non-empty argument")]
    EmptyArgument(String),

    #[error("policy 'then' lists no configuration commands")]
    NoCommands,
}

// ============================================================================
// Predicates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Ping from the device to the address succeeds at 100%
    HostReachable(String),
    /// Device OS version starts with the prefix
    IosVersionPrefix(String),
    /// Device hardware type equals the model exactly
    HardwareType(String),
}

impl Predicate {
    pub fn parse(name: &str, argument: &str) -> Result<Self, PolicyError> {
        let argument = argument.trim();
        let predicate = match name {
            "host_reachable" => Predicate::HostReachable(argument.to_string()),
            "ios_version_prefix" => Predicate::IosVersionPrefix(argument.to_string()),
            "hardware_type" => Predicate::HardwareType(argument.to_string()),
            other => return Err(PolicyError::UnknownPredicate(other.to_string())),
        };
        if argument.is_empty() {
            return Err(PolicyError::EmptyArgument(name.to_string()));
        }
        Ok(predicate)
    }

    /// Evaluate against a live session. Unknown facts never satisfy a predicate.
    pub async fn evaluate(&self, session: &mut DeviceSession) -> Result<bool, SessionError> {
        match self {
            Predicate::HostReachable(address) => session.is_host_reachable(address).await,
            Predicate::IosVersionPrefix(prefix) => Ok(session
                .ios_version()
                .await?
                .is_some_and(|version| version.starts_with(prefix.as_str()))),
            Predicate::HardwareType(model) => Ok(session
                .hardware_type()
                .await?
                .is_some_and(|hardware| hardware == *model)),
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::HostReachable(a) => write!(f, "host_reachable({a})"),
            Predicate::IosVersionPrefix(p) => write!(f, "ios_version_prefix({p})"),
            Predicate::HardwareType(m) => write!(f, "hardware_type({m})"),
        }
    }
}

// ============================================================================
// Rule
// ============================================================================

/// Immutable after load; shared across tasks behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub predicate: Predicate,
    /// Configuration lines, pushed in order as one batch
    pub commands: Vec<String>,
}

impl PolicyRule {
    pub fn new(predicate: Predicate, commands: Vec<String>) -> Result<Self, PolicyError> {
        if commands.iter().all(|c| c.trim().is_empty()) {
            return Err(PolicyError::NoCommands);
        }
        Ok(Self {
            predicate,
            commands,
        })
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        if config.when.len() != 1 {
            return Err(PolicyError::PredicateCount(config.when.len()));
        }
        let predicate = config
            .when
            .iter()
            .next()
            .map(|(name, argument)| Predicate::parse(name, argument))
            .ok_or(PolicyError::PredicateCount(0))??;

        let commands = config
            .then
            .iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Self::new(predicate, commands)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// What the evaluator did for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum PolicyOutcome {
    /// Predicate held and the device accepted the batch
    Applied,
    /// Predicate held but the push failed; changes are not confirmed
    PushFailed(String),
    ConditionFalse,
    /// Predicate could not be evaluated
    ConditionError(String),
    /// No rule configured
    NoRule,
}

impl PolicyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PolicyOutcome::Applied)
    }
}

/// Evaluate `rule` and push its commands when the predicate holds.
///
/// Never fails the task: errors end up in the returned outcome.
pub async fn evaluate(session: &mut DeviceSession, rule: Option<&PolicyRule>) -> PolicyOutcome {
    let Some(rule) = rule else {
        return PolicyOutcome::NoRule;
    };

    let holds = match rule.predicate.evaluate(session).await {
        Ok(holds) => holds,
        Err(e) => {
            warn!(host = session.host(), predicate = %rule.predicate, error = %e, "Policy condition could not be evaluated");
            return PolicyOutcome::ConditionError(e.to_string());
        }
    };

    if !holds {
        info!(host = session.host(), predicate = %rule.predicate, "Policy condition false, changes not applied");
        return PolicyOutcome::ConditionFalse;
    }

    match session.push_config(&rule.commands).await {
        Ok(output) => {
            debug!(host = session.host(), output = %output, "Configuration push output");
            info!(host = session.host(), commands = rule.commands.len(), "Policy applied");
            PolicyOutcome::Applied
        }
        Err(e) => {
            warn!(host = session.host(), error = %e, "Policy push failed, changes not confirmed");
            PolicyOutcome::PushFailed(e.to_string())
        }
    }
}

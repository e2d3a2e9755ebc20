//! Fleet Configuration Module
//!
//! Run settings, credential defaults, the host inventory and the policy rule,
//! loaded from one TOML file.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `NETFLEET_CONFIG` environment variable (path to TOML file)
//! 3. `netfleet.toml` in the current working directory
//! 4. Built-in defaults (empty inventory)
//!
//! `NETFLEET_PASSWORD` and `NETFLEET_SECRET` override the credential
//! template so secrets can stay out of the file.
//!
//! ## Usage
//!
//! ```ignore
//! let mut config = FleetConfig::load(cli.config.as_deref())?;
//! config.apply_env_overrides();
//! let rule = config.policy_rule()?;
//! ```

mod fleet_config;
pub mod defaults;
pub mod validation;

pub use fleet_config::*;

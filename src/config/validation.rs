//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Unknown keys never break a config.

use std::collections::HashSet;

use super::defaults::MAX_WORKERS_LIMIT;
use crate::inventory;
use crate::policy::PREDICATE_NAMES;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for FleetConfig.
///
/// Array-of-tables entries (`[[hosts]]`) use the array name as prefix.
/// Any new field added to FleetConfig must be added here too; predicate
/// keys under `policy.when` come from `PREDICATE_NAMES`.
pub fn known_config_keys() -> HashSet<String> {
    let keys: &[&str] = &[
        // [settings]
        "settings",
        "settings.debug",
        "settings.delimiter",
        "settings.backup_dir",
        "settings.max_workers",
        "settings.connect_timeout_secs",
        "settings.command_timeout_secs",
        "settings.verify_host_keys",
        // [defaults]
        "defaults",
        "defaults.device_type",
        "defaults.username",
        "defaults.password",
        "defaults.port",
        "defaults.secret",
        // [[hosts]]
        "hosts",
        "hosts.host",
        // [policy]
        "policy",
        "policy.when",
        "policy.then",
    ];
    keys.iter()
        .map(|k| (*k).to_string())
        .chain(PREDICATE_NAMES.iter().map(|p| format!("policy.when.{p}")))
        .collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`. Tables inside arrays are walked under the array's
/// own path, so `[[hosts]] host = ".."` yields `["hosts", "hosts.host"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        for nested in walk_toml_keys(item, &path) {
                            if !keys.contains(&nested) {
                                keys.push(nested);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for k in known.iter().map(String::as_str) {
        let dist = levenshtein(unknown, k);
        if dist > 3 {
            continue;
        }
        // Ties resolve alphabetically so suggestions are stable.
        let better = match best {
            None => true,
            Some((best_key, best_dist)) => dist < best_dist || (dist == best_dist && k < best_key),
        };
        if better {
            best = Some((k, dist));
        }
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Does NOT fail on unknown keys, it only warns. Per-host overrides
/// (e.g. `[[hosts]] username = ".."`) land here as well: host entries take
/// only an address for now.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    let found = walk_toml_keys(&value, "");
    let mut warnings = Vec::new();

    for key in &found {
        if !known.contains(key.as_str()) {
            let suggestion = suggest_correction(key, &known);
            let message = format!("Unknown config key '{key}'");
            warnings.push(ValidationWarning {
                field: key.clone(),
                message,
                suggestion,
            });
        }
    }

    warnings
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate ranges on a parsed FleetConfig.
///
/// Returns (errors, warnings): errors are impossible values that must
/// prevent the run; warnings are suspicious but not fatal.
pub fn validate_ranges(config: &super::FleetConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let s = &config.settings;

    if s.max_workers == 0 {
        errors.push("settings.max_workers = 0 must be >= 1".to_string());
    } else if s.max_workers > MAX_WORKERS_LIMIT {
        errors.push(format!(
            "settings.max_workers = {} exceeds the limit of {MAX_WORKERS_LIMIT}",
            s.max_workers
        ));
    }

    if s.delimiter.is_empty() {
        errors.push("settings.delimiter must not be empty".to_string());
    }

    if s.connect_timeout_secs == 0 {
        errors.push("settings.connect_timeout_secs must be > 0".to_string());
    }
    if s.command_timeout_secs == 0 {
        errors.push("settings.command_timeout_secs must be > 0".to_string());
    }

    if s.backup_dir.as_os_str().is_empty() {
        errors.push("settings.backup_dir must not be empty".to_string());
    }

    if config.defaults.port == 0 {
        errors.push("defaults.port = 0 is not a valid TCP port".to_string());
    }

    for problem in inventory::check_hosts(&config.hosts) {
        match problem {
            inventory::InventoryError::EmptyHost(_) => errors.push(format!("hosts: {problem}")),
            inventory::InventoryError::DuplicateHost(ref host) => warnings.push(ValidationWarning {
                field: "hosts.host".to_string(),
                message: format!("hosts: '{host}' is listed more than once and will be processed once"),
                suggestion: None,
            }),
        }
    }

    if !config.defaults.device_type.to_ascii_lowercase().starts_with("cisco") {
        warnings.push(ValidationWarning {
            field: "defaults.device_type".to_string(),
            message: format!(
                "defaults.device_type = '{}' is not a Cisco dialect; SSH sessions will be refused",
                config.defaults.device_type
            ),
            suggestion: None,
        });
    }

    if !s.verify_host_keys {
        warnings.push(ValidationWarning {
            field: "settings.verify_host_keys".to_string(),
            message: "settings.verify_host_keys = false accepts any SSH host key".to_string(),
            suggestion: None,
        });
    }

    if s.command_timeout_secs > 0 && s.command_timeout_secs < 5 {
        warnings.push(ValidationWarning {
            field: "settings.command_timeout_secs".to_string(),
            message: format!(
                "settings.command_timeout_secs = {} is very short; show running-config may not finish",
                s.command_timeout_secs
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

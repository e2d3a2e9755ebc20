//! BackupStore trait: pluggable running-config persistence
//!
//! - `FileBackupStore`: one file per device per day under a backup directory
//! - `MemoryBackupStore`: in-memory store for tests and dry runs
//!
//! Backup failures never fail a device task; callers log and continue.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::defaults::BACKUP_DATE_FORMAT;

/// Backup errors
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid device id '{0}'")]
    InvalidDeviceId(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persists raw configuration text for a device.
///
/// Implementations must be thread-safe: one store is shared by every task.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Store `config` for `device_id`. Returns where it landed.
    async fn store(
        &self,
        device_id: &str,
        date_prefix: &str,
        config: &str,
    ) -> Result<String, BackupError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Filename prefix for backups taken today, e.g. `2024-03-01-`.
pub fn date_prefix() -> String {
    chrono::Local::now().format(BACKUP_DATE_FORMAT).to_string()
}

/// Make a device id safe to use as a single path component.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`; leading dots are stripped
/// so ids cannot produce hidden files or `..`.
pub fn sanitize_device_id(device_id: &str) -> Result<String, BackupError> {
    let cleaned: String = device_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        return Err(BackupError::InvalidDeviceId(device_id.to_string()));
    }
    Ok(cleaned)
}

// ============================================================================
// File store
// ============================================================================

/// Writes `<dir>/<date_prefix><device_id>`, creating `dir` on first use.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn store(
        &self,
        device_id: &str,
        date_prefix: &str,
        config: &str,
    ) -> Result<String, BackupError> {
        let file_name = format!("{date_prefix}{}", sanitize_device_id(device_id)?);
        let path = self.dir.join(file_name);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| BackupError::Io {
                path: self.dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, config)
            .await
            .map_err(|source| BackupError::Io {
                path: path.clone(),
                source,
            })?;

        info!(device = device_id, path = %path.display(), bytes = config.len(), "Running config saved");
        Ok(path.display().to_string())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// In-memory store keyed by `<date_prefix><device_id>`.
///
/// Thread-safe via `RwLock`. Not durable.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn store(
        &self,
        device_id: &str,
        date_prefix: &str,
        config: &str,
    ) -> Result<String, BackupError> {
        let key = format!("{date_prefix}{}", sanitize_device_id(device_id)?);
        let mut entries = self
            .entries
            .write()
            .map_err(|e| BackupError::Storage(e.to_string()))?;
        entries.insert(key.clone(), config.to_string());
        debug!(key = %key, "Backup stored in memory");
        Ok(key)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

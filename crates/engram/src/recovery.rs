//! Backup-and-retry protection for mutating operations
//!
//! Every guarded operation gets a logical key (operation type plus target
//! resource). When the operation targets a file, a timestamped backup is
//! taken first and recorded in a durable recovery log; on failure the target
//! is restored from its backup and the operation retried up to a bounded
//! number of attempts. The log survives process restarts so an operation
//! interrupted mid-retry can be identified on the next startup.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{EngramError, EngramResult};

const RECOVERY_LOG: &str = "recovery_state.json";

/// Identifies a guarded operation and its target resource
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Operation type, e.g. "memory_save"
    pub kind: String,

    /// Target file, when the operation mutates one
    pub file_path: Option<PathBuf>,
}

impl OperationContext {
    /// Context for an operation that touches no file
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            file_path: None,
        }
    }

    /// Context for an operation mutating `path`
    pub fn with_file(kind: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: kind.into(),
            file_path: Some(path.into()),
        }
    }

    fn key(&self) -> String {
        match &self.file_path {
            Some(path) => format!("{}::{}", self.kind, path.display()),
            None => self.kind.clone(),
        }
    }
}

/// A backup taken for an operation that has not yet succeeded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Where the backup copy lives
    pub backup_path: PathBuf,

    /// The file the backup protects
    pub target_path: PathBuf,

    /// When the backup was taken
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecoveryState {
    pending_operations: Vec<PendingOperation>,
}

struct RecoveryInner {
    retry_counts: HashMap<String, u32>,
    state: RecoveryState,
}

/// Wraps mutating operations with backup, bounded retry, and restore
pub struct RecoveryCoordinator {
    backup_dir: PathBuf,
    max_retries: u32,
    inner: Mutex<RecoveryInner>,
}

impl RecoveryCoordinator {
    /// Create a coordinator storing backups and its log under `backup_dir`
    ///
    /// Any recovery log left by a previous process is loaded so interrupted
    /// operations remain visible.
    pub fn new(backup_dir: impl Into<PathBuf>, max_retries: u32) -> Self {
        let backup_dir = backup_dir.into();
        let state = Self::load_state(&backup_dir.join(RECOVERY_LOG));

        Self {
            backup_dir,
            max_retries,
            inner: Mutex::new(RecoveryInner {
                retry_counts: HashMap::new(),
                state,
            }),
        }
    }

    fn load_state(log_path: &Path) -> RecoveryState {
        match std::fs::read(log_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to parse recovery state");
                RecoveryState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecoveryState::default(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load recovery state");
                RecoveryState::default()
            }
        }
    }

    async fn save_state(&self, state: &RecoveryState) {
        let log_path = self.backup_dir.join(RECOVERY_LOG);
        let bytes = match serde_json::to_vec(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode recovery state");
                return;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.backup_dir).await {
            tracing::error!(error = %e, "Failed to create backup directory");
            return;
        }
        if let Err(e) = tokio::fs::write(&log_path, bytes).await {
            tracing::error!(error = %e, "Failed to save recovery state");
        }
    }

    /// Backups and pending entries left behind by failed operations
    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.inner.lock().await.state.pending_operations.clone()
    }

    /// Run `operation` with backup, bounded retry, and restore-on-failure
    ///
    /// The retry counter is keyed by operation type and target; on terminal
    /// failure it is dropped so the next independent call starts fresh. The
    /// success result leaves no pending log entry behind.
    pub async fn with_recovery<T, F, Fut>(
        &self,
        operation: F,
        context: &OperationContext,
    ) -> EngramResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = EngramResult<T>>,
    {
        let op_key = context.key();

        loop {
            {
                let inner = self.inner.lock().await;
                let retries = inner.retry_counts.get(&op_key).copied().unwrap_or(0);
                if retries >= self.max_retries {
                    drop(inner);
                    tracing::error!(
                        operation = %op_key,
                        attempts = retries,
                        "Max retries exceeded"
                    );
                    self.inner.lock().await.retry_counts.remove(&op_key);
                    return Err(EngramError::recovery(
                        op_key.clone(),
                        retries,
                        "operation failed after max retries",
                    ));
                }
            }

            if let Some(path) = &context.file_path {
                if let Some(backup_path) = self.backup_file(path).await? {
                    let mut inner = self.inner.lock().await;
                    inner.state.pending_operations.push(PendingOperation {
                        backup_path,
                        target_path: path.clone(),
                        timestamp: Utc::now(),
                    });
                    self.save_state(&inner.state).await;
                }
            }

            match operation().await {
                Ok(result) => {
                    let mut inner = self.inner.lock().await;
                    if let Some(path) = &context.file_path {
                        inner
                            .state
                            .pending_operations
                            .retain(|op| op.target_path != *path);
                        self.save_state(&inner.state).await;
                    }
                    inner.retry_counts.remove(&op_key);
                    return Ok(result);
                }
                Err(e) => {
                    let attempt = {
                        let mut inner = self.inner.lock().await;
                        let count = inner.retry_counts.entry(op_key.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };

                    tracing::error!(
                        operation = %op_key,
                        error = %e,
                        retry = attempt,
                        "Operation failed, attempting recovery"
                    );

                    if let Some(path) = &context.file_path {
                        let pending = {
                            let inner = self.inner.lock().await;
                            inner
                                .state
                                .pending_operations
                                .iter()
                                .rev()
                                .find(|op| op.target_path == *path)
                                .cloned()
                        };
                        if let Some(pending) = pending {
                            if !self.restore_file(&pending.backup_path, &pending.target_path).await
                            {
                                return Err(e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Copy `path` into the backup directory, returning the backup location
    ///
    /// An absent target needs no backup and yields None.
    async fn backup_file(&self, path: &Path) -> EngramResult<Option<PathBuf>> {
        if !path.exists() {
            tracing::debug!(file = %path.display(), "No existing file to back up");
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| EngramError::storage("create_backup_dir", e))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        let backup_path = self.backup_dir.join(format!("{name}.{stamp}.bak"));

        tokio::fs::copy(path, &backup_path)
            .await
            .map_err(|e| EngramError::storage("backup", e))?;

        tracing::info!(file = %path.display(), backup = %backup_path.display(), "Backup created");
        Ok(Some(backup_path))
    }

    async fn restore_file(&self, backup_path: &Path, target_path: &Path) -> bool {
        match tokio::fs::copy(backup_path, target_path).await {
            Ok(_) => {
                tracing::info!(file = %target_path.display(), "Restored from backup");
                true
            }
            Err(e) => {
                tracing::error!(
                    file = %target_path.display(),
                    error = %e,
                    "Restore failed"
                );
                false
            }
        }
    }

    /// Delete backup copies older than `max_age`, returning how many
    pub async fn cleanup_old_backups(&self, max_age: std::time::Duration) -> usize {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bak") {
                continue;
            }

            let age = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|m| m.elapsed().ok());

            if age.map_or(false, |age| age >= max_age) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        tracing::debug!(file = %path.display(), "Removed old backup");
                        removed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            file = %path.display(),
                            error = %e,
                            "Failed to remove old backup"
                        );
                    }
                }
            }
        }
        removed
    }
}

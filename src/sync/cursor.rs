//! Synchronization cursor
//!
//! Tracks the highest event version whose apply committed. It only moves
//! forward, except when a full resynchronization resets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

use super::SyncError;

/// Process-wide sync position
#[derive(Debug, Default)]
pub struct SyncCursor {
    version: AtomicU64,
    initialized: AtomicBool,
}

impl SyncCursor {
    /// Cursor with no checkpoint
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed version, if any event committed yet
    pub fn checkpoint(&self) -> Option<u64> {
        if self.initialized.load(Ordering::Acquire) {
            Some(self.version.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Move forward to `version`; never moves backwards
    pub fn advance(&self, version: u64) -> u64 {
        let previous = self.version.fetch_max(version, Ordering::AcqRel);
        self.initialized.store(true, Ordering::Release);
        previous.max(version)
    }

    /// Set the cursor unconditionally (full resynchronization only)
    pub fn reset(&self, version: u64) {
        self.version.store(version, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }

    /// Whether an event at `version` predates the committed checkpoint
    pub fn is_behind(&self, version: u64) -> bool {
        self.checkpoint().map(|c| version < c).unwrap_or(false)
    }
}

/// Persisted cursor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorCheckpoint {
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// JSON checkpoint file
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the checkpoint; `None` when no file exists yet
    pub async fn load(&self) -> Result<Option<CursorCheckpoint>, SyncError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("No checkpoint at {}", self.path.display());
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SyncError::Checkpoint(format!("{}: {e}", self.path.display())))?;
        let checkpoint: CursorCheckpoint = serde_json::from_str(&content)
            .map_err(|e| SyncError::Checkpoint(format!("{}: {e}", self.path.display())))?;

        info!(
            "Loaded checkpoint {} from {}",
            checkpoint.version,
            self.path.display()
        );
        Ok(Some(checkpoint))
    }

    /// Write the checkpoint via temp file and rename
    pub async fn save(&self, version: u64) -> Result<(), SyncError> {
        let checkpoint = CursorCheckpoint {
            version,
            updated_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&checkpoint)
            .map_err(|e| SyncError::Checkpoint(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::Checkpoint(format!("{}: {e}", parent.display())))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| SyncError::Checkpoint(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::Checkpoint(format!("{}: {e}", self.path.display())))?;

        debug!("Saved checkpoint {} to {}", version, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cursor_is_monotonic() {
        let cursor = SyncCursor::new();
        assert_eq!(cursor.checkpoint(), None);
        assert!(!cursor.is_behind(1));

        cursor.advance(5);
        cursor.advance(3);
        assert_eq!(cursor.checkpoint(), Some(5));
        assert!(cursor.is_behind(4));
        assert!(!cursor.is_behind(5));

        cursor.reset(2);
        assert_eq!(cursor.checkpoint(), Some(2));
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/cursor.json"));

        assert!(store.load().await.unwrap().is_none());

        store.save(42).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.version, 42);
        assert!(!dir.path().join("nested/cursor.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "not json").unwrap();

        let result = CheckpointStore::new(&path).load().await;
        assert!(matches!(result, Err(SyncError::Checkpoint(_))));
    }
}

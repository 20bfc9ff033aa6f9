//! Control-plane synchronization
//!
//! The [`Synchronizer`] is the single writer of the artifact store. It
//! applies feed events to the store, pushes them to the execution engine
//! and keeps retrying failed pushes in the background until they commit
//! or are dead-lettered.

mod cursor;
mod resync;
mod retry;
mod status;
mod synchronizer;

pub use cursor::{CheckpointStore, CursorCheckpoint, SyncCursor};
pub use resync::ResyncSummary;
pub use retry::RetryPolicy;
pub use status::{DeadLetter, SyncStatus, SyncStatusHandle};
pub use synchronizer::{SyncSettings, Synchronizer};

use thiserror::Error;

use crate::feed::FeedError;
use crate::models::ArtifactKey;
use crate::store::StoreError;

/// Synchronization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Protocol violation for {key}: {reason}")]
    ProtocolViolation { key: ArtifactKey, reason: String },

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

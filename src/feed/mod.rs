//! Control-plane feed
//!
//! Ordered stream of deployment changes plus the authoritative full state
//! used for resynchronization.

mod channel;
mod file;

pub use channel::{ChannelFeed, ChannelFeedHandle};
pub use file::{ArtifactRecord, FileFeed};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Artifact, FeedMessage};

/// Feed errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Feed disconnected: {0}")]
    Disconnected(String),

    #[error("Malformed feed message at {position}: {reason}")]
    Malformed { position: usize, reason: String },

    #[error("Feed I/O error: {0}")]
    Io(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),
}

impl FeedError {
    /// Malformed input is dropped; everything else warrants a reconnect
    pub fn is_transient(&self) -> bool {
        !matches!(self, FeedError::Malformed { .. })
    }
}

/// Source of deployment state
#[async_trait]
pub trait ControlPlaneFeed: Send + Sync {
    /// (Re)connect, resuming after the given committed version
    async fn connect(&mut self, resume_from: Option<u64>) -> Result<(), FeedError>;

    /// Next message; `Ok(None)` when the feed has ended
    ///
    /// Must be cancel-safe: the synchronizer races it against retry timers.
    async fn next(&mut self) -> Result<Option<FeedMessage>, FeedError>;

    /// Authoritative deployment state of one tenant
    async fn fetch_full_state(&self, tenant: &str) -> Result<Vec<Artifact>, FeedError>;

    /// Tenants known to the control plane
    async fn tenants(&self) -> Result<Vec<String>, FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FeedError::Disconnected("eof".into()).is_transient());
        assert!(FeedError::Io("broken pipe".into()).is_transient());
        assert!(!FeedError::Malformed {
            position: 3,
            reason: "bad json".into()
        }
        .is_transient());
    }
}

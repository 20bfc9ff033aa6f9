//! In-process control-plane feed
//!
//! Backed by a tokio channel; the handle side plays the control plane.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::{Artifact, FeedMessage};

use super::{ControlPlaneFeed, FeedError};

#[derive(Debug, Default)]
struct ControlPlaneState {
    full_state: HashMap<String, Vec<Artifact>>,
    connects: Vec<Option<u64>>,
}

/// Feed side, owned by the synchronizer
#[derive(Debug)]
pub struct ChannelFeed {
    rx: mpsc::UnboundedReceiver<Result<FeedMessage, FeedError>>,
    state: Arc<Mutex<ControlPlaneState>>,
}

/// Control-plane side
#[derive(Clone, Debug)]
pub struct ChannelFeedHandle {
    tx: mpsc::UnboundedSender<Result<FeedMessage, FeedError>>,
    state: Arc<Mutex<ControlPlaneState>>,
}

impl ChannelFeed {
    pub fn new() -> (Self, ChannelFeedHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ControlPlaneState::default()));
        (
            Self {
                rx,
                state: Arc::clone(&state),
            },
            ChannelFeedHandle { tx, state },
        )
    }
}

impl ChannelFeedHandle {
    /// Push a message; returns false once the feed side is gone
    pub fn send(&self, message: FeedMessage) -> bool {
        self.tx.send(Ok(message)).is_ok()
    }

    /// Inject a feed error
    pub fn fail(&self, error: FeedError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Set the authoritative state served for a tenant
    pub fn set_full_state(&self, tenant: impl Into<String>, artifacts: Vec<Artifact>) {
        self.state.lock().full_state.insert(tenant.into(), artifacts);
    }

    /// Resume points passed to each connect call
    pub fn connects(&self) -> Vec<Option<u64>> {
        self.state.lock().connects.clone()
    }
}

#[async_trait]
impl ControlPlaneFeed for ChannelFeed {
    async fn connect(&mut self, resume_from: Option<u64>) -> Result<(), FeedError> {
        self.state.lock().connects.push(resume_from);
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<FeedMessage>, FeedError> {
        match self.rx.recv().await {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }

    async fn fetch_full_state(&self, tenant: &str) -> Result<Vec<Artifact>, FeedError> {
        self.state
            .lock()
            .full_state
            .get(tenant)
            .cloned()
            .ok_or_else(|| FeedError::UnknownTenant(tenant.to_string()))
    }

    async fn tenants(&self) -> Result<Vec<String>, FeedError> {
        let mut tenants: Vec<String> = self.state.lock().full_state.keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_round_trip_and_close() {
        let (mut feed, handle) = ChannelFeed::new();
        feed.connect(Some(3)).await.unwrap();

        handle.send(FeedMessage::Heartbeat { head_version: 7 });
        handle.fail(FeedError::Disconnected("reset".into()));
        drop(handle);

        assert_eq!(
            feed.next().await.unwrap(),
            Some(FeedMessage::Heartbeat { head_version: 7 })
        );
        assert!(feed.next().await.is_err());
        assert_eq!(feed.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_full_state_lookup() {
        let (feed, handle) = ChannelFeed::new();
        handle.set_full_state("t1", Vec::new());

        assert_eq!(feed.tenants().await.unwrap(), vec!["t1".to_string()]);
        assert!(feed.fetch_full_state("t1").await.unwrap().is_empty());
        assert!(feed.fetch_full_state("t2").await.is_err());
        assert_eq!(handle.connects(), Vec::<Option<u64>>::new());
    }
}

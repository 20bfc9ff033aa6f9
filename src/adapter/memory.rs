//! In-process engine adapters
//!
//! `InMemoryEngine` keeps what it was told to run and can be scripted to
//! fail or stall. `LoggingAdapter` accepts everything (dry-run mode).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::models::{Artifact, ArtifactKey, EventOp};

use super::{AdapterError, ProxyAdapter};

/// A push that changed engine state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnginePush {
    pub op: EventOp,
    pub key: ArtifactKey,
    pub content_hash: Option<String>,
}

#[derive(Debug, Default)]
struct EngineState {
    running: HashMap<ArtifactKey, String>,
    pushes: Vec<EnginePush>,
    attempts: usize,
    failures_remaining: u32,
}

/// Engine double that records effective pushes
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
    delay: Option<Duration>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every push, e.g. to exercise push timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `count` pushes as unavailable
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_remaining = count;
    }

    /// Pushes that changed engine state, in order
    pub fn pushes(&self) -> Vec<EnginePush> {
        self.state.lock().pushes.clone()
    }

    pub fn deploy_count(&self) -> usize {
        self.state
            .lock()
            .pushes
            .iter()
            .filter(|p| p.op == EventOp::Deploy)
            .count()
    }

    /// Every call, including failed and duplicate ones
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Content hash the engine is running for `key`
    pub fn running(&self, key: &ArtifactKey) -> Option<String> {
        self.state.lock().running.get(key).cloned()
    }

    async fn begin(&self) -> Result<(), AdapterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.attempts += 1;
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(AdapterError::Unavailable("scripted failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyAdapter for InMemoryEngine {
    async fn deploy(&self, artifact: &Artifact) -> Result<(), AdapterError> {
        self.begin().await?;
        let mut state = self.state.lock();
        if state.running.get(&artifact.key) == Some(&artifact.content_hash) {
            return Ok(());
        }
        state
            .running
            .insert(artifact.key.clone(), artifact.content_hash.clone());
        state.pushes.push(EnginePush {
            op: EventOp::Deploy,
            key: artifact.key.clone(),
            content_hash: Some(artifact.content_hash.clone()),
        });
        Ok(())
    }

    async fn undeploy(&self, key: &ArtifactKey) -> Result<(), AdapterError> {
        self.begin().await?;
        let mut state = self.state.lock();
        if state.running.remove(key).is_some() {
            state.pushes.push(EnginePush {
                op: EventOp::Undeploy,
                key: key.clone(),
                content_hash: None,
            });
        }
        Ok(())
    }
}

/// Adapter that accepts every push and logs it
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingAdapter;

#[async_trait]
impl ProxyAdapter for LoggingAdapter {
    async fn deploy(&self, artifact: &Artifact) -> Result<(), AdapterError> {
        info!(
            "[dry-run] deploy {} {} ({} bytes, hash {})",
            artifact.kind,
            artifact.key,
            artifact.payload.len(),
            &artifact.content_hash[..12.min(artifact.content_hash.len())]
        );
        Ok(())
    }

    async fn undeploy(&self, key: &ArtifactKey) -> Result<(), AdapterError> {
        info!("[dry-run] undeploy {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtifactKind;

    fn api(payload: &str) -> Artifact {
        Artifact::new(ArtifactKey::new("t1", "PetStore", "v1"), ArtifactKind::Api, payload, 1)
    }

    #[tokio::test]
    async fn test_duplicate_deploy_is_not_pushed_twice() {
        let engine = InMemoryEngine::new();
        engine.deploy(&api("P1")).await.unwrap();
        engine.deploy(&api("P1")).await.unwrap();

        assert_eq!(engine.attempts(), 2);
        assert_eq!(engine.deploy_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let engine = InMemoryEngine::new();
        engine.fail_next(2);

        assert!(engine.deploy(&api("P1")).await.is_err());
        assert!(engine.deploy(&api("P1")).await.is_err());
        assert!(engine.deploy(&api("P1")).await.is_ok());
        assert_eq!(engine.deploy_count(), 1);
    }

    #[tokio::test]
    async fn test_undeploy_absent_is_ok() {
        let engine = InMemoryEngine::new();
        let key = ArtifactKey::new("t1", "Missing", "v1");
        engine.undeploy(&key).await.unwrap();
        assert!(engine.pushes().is_empty());
    }
}

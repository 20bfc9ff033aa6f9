//! Execution-engine proxy adapters
//!
//! Adapters push synchronized artifacts into the engine that mediates live
//! traffic. Pushes must be idempotent by content hash, since a push whose
//! confirmation timed out is retried.

mod http;
mod memory;

pub use http::HttpEngineAdapter;
pub use memory::{EnginePush, InMemoryEngine, LoggingAdapter};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Artifact, ArtifactKey, ArtifactKind};

/// Engine push failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Engine push timed out after {0}ms")]
    Timeout(u64),

    #[error("Engine rejected {key}: {reason}")]
    Rejected { key: ArtifactKey, reason: String },

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("No adapter registered for {0}")]
    NoAdapter(ArtifactKind),
}

/// Administrative interface of the engine for one artifact kind
#[async_trait]
pub trait ProxyAdapter: Send + Sync {
    /// Deploy or redeploy an artifact
    async fn deploy(&self, artifact: &Artifact) -> Result<(), AdapterError>;

    /// Remove an artifact; removing an absent artifact succeeds
    async fn undeploy(&self, key: &ArtifactKey) -> Result<(), AdapterError>;
}

/// One adapter per artifact kind
#[derive(Clone, Default)]
pub struct EngineAdapters {
    adapters: HashMap<ArtifactKind, Arc<dyn ProxyAdapter>>,
}

impl EngineAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the same adapter for every kind
    pub fn uniform(adapter: Arc<dyn ProxyAdapter>) -> Self {
        let mut adapters = Self::new();
        for kind in ArtifactKind::all() {
            adapters = adapters.with(kind, Arc::clone(&adapter));
        }
        adapters
    }

    pub fn with(mut self, kind: ArtifactKind, adapter: Arc<dyn ProxyAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    fn adapter(&self, kind: ArtifactKind) -> Result<&Arc<dyn ProxyAdapter>, AdapterError> {
        self.adapters.get(&kind).ok_or(AdapterError::NoAdapter(kind))
    }

    pub async fn deploy(&self, artifact: &Artifact) -> Result<(), AdapterError> {
        self.adapter(artifact.kind)?.deploy(artifact).await
    }

    pub async fn undeploy(
        &self,
        kind: ArtifactKind,
        key: &ArtifactKey,
    ) -> Result<(), AdapterError> {
        self.adapter(kind)?.undeploy(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let apis = Arc::new(InMemoryEngine::new());
        let sequences = Arc::new(InMemoryEngine::new());
        let adapters = EngineAdapters::new()
            .with(ArtifactKind::Api, apis.clone())
            .with(ArtifactKind::Sequence, sequences.clone());

        let key = ArtifactKey::new("t1", "PetStore", "v1");
        let api = Artifact::new(key, ArtifactKind::Api, "P1", 1);
        adapters.deploy(&api).await.unwrap();

        assert_eq!(apis.deploy_count(), 1);
        assert_eq!(sequences.deploy_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_adapter() {
        let adapters = EngineAdapters::new();
        let key = ArtifactKey::new("t1", "Vault", "v1");
        let result = adapters.undeploy(ArtifactKind::LocalEntry, &key).await;
        assert_eq!(result, Err(AdapterError::NoAdapter(ArtifactKind::LocalEntry)));
    }
}

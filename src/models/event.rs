//! Control-plane event models
//!
//! Defines deployment events, feed messages and per-apply states.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::artifact::{ApiRef, Artifact, ArtifactKey, ArtifactKind};

/// Deployment operation carried by an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOp {
    Deploy,
    Undeploy,
}

impl EventOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOp::Deploy => "deploy",
            EventOp::Undeploy => "undeploy",
        }
    }
}

impl fmt::Display for EventOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One change pushed by the control plane
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub key: ArtifactKey,
    pub kind: ArtifactKind,
    pub op: EventOp,

    /// Monotonically increasing feed version
    pub version: u64,

    /// Required for deploys, ignored for undeploys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiRef>,
}

impl DeploymentEvent {
    pub fn deploy(
        key: ArtifactKey,
        kind: ArtifactKind,
        payload: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            key,
            kind,
            op: EventOp::Deploy,
            version,
            payload: Some(payload.into()),
            api: None,
        }
    }

    pub fn undeploy(key: ArtifactKey, kind: ArtifactKind, version: u64) -> Self {
        Self {
            key,
            kind,
            op: EventOp::Undeploy,
            version,
            payload: None,
            api: None,
        }
    }

    pub fn with_api(mut self, api: ApiRef) -> Self {
        self.api = Some(api);
        self
    }

    /// Build the artifact a deploy event describes
    ///
    /// Returns `None` for undeploys and for deploys missing a payload.
    pub fn to_artifact(&self) -> Option<Artifact> {
        if self.op != EventOp::Deploy {
            return None;
        }
        let payload = self.payload.as_ref()?;
        let mut artifact =
            Artifact::new(self.key.clone(), self.kind, payload.clone(), self.version);
        artifact.api = self.api.clone();
        Some(artifact)
    }
}

/// Messages read from the control-plane feed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Event(DeploymentEvent),

    /// Tenant removed from the control plane; its partition is evicted
    TenantDeleted { tenant: String, version: u64 },

    /// Control plane asks for a full resynchronization of one tenant
    ResyncRequested { tenant: String },

    /// Consistency check carrying the control plane's head version
    Heartbeat { head_version: u64 },
}

/// Lifecycle of one artifact-apply attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyState {
    Pending,
    Applying,
    Committed,
    Failed,
    Retrying,
    DeadLettered,
}

impl ApplyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyState::Pending => "pending",
            ApplyState::Applying => "applying",
            ApplyState::Committed => "committed",
            ApplyState::Failed => "failed",
            ApplyState::Retrying => "retrying",
            ApplyState::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ApplyState::Committed | ApplyState::DeadLettered)
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: ApplyState) -> bool {
        use ApplyState::*;
        matches!(
            (self, next),
            (Pending, Applying)
                | (Applying, Committed)
                | (Applying, Failed)
                | (Failed, Retrying)
                | (Failed, DeadLettered)
                | (Retrying, Committed)
                | (Retrying, Failed)
                | (Retrying, DeadLettered)
        )
    }
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Deployed artifact models
//!
//! Defines the artifact kinds a gateway node carries and the key that
//! identifies one deployable unit inside one tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Kinds of gateway artifacts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Api,
    Sequence,
    Endpoint,
    LocalEntry,
}

impl ArtifactKind {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Api => "API",
            ArtifactKind::Sequence => "Sequence",
            ArtifactKind::Endpoint => "Endpoint",
            ArtifactKind::LocalEntry => "Local Entry",
        }
    }

    /// Path segment used by the engine admin surface
    pub fn path_segment(&self) -> &'static str {
        match self {
            ArtifactKind::Api => "apis",
            ArtifactKind::Sequence => "sequences",
            ArtifactKind::Endpoint => "endpoints",
            ArtifactKind::LocalEntry => "local-entries",
        }
    }

    /// Get all artifact kinds
    pub fn all() -> Vec<ArtifactKind> {
        vec![
            ArtifactKind::Api,
            ArtifactKind::Sequence,
            ArtifactKind::Endpoint,
            ArtifactKind::LocalEntry,
        ]
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<ArtifactKind> {
        match s.to_lowercase().as_str() {
            "api" | "apis" => Some(ArtifactKind::Api),
            "sequence" | "sequences" | "seq" => Some(ArtifactKind::Sequence),
            "endpoint" | "endpoints" => Some(ArtifactKind::Endpoint),
            "local_entry" | "local-entry" | "localentry" | "local-entries" => {
                Some(ArtifactKind::LocalEntry)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Identity of one deployable unit within one tenant
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub tenant_domain: String,
    pub name: String,
    pub version: String,
}

impl ArtifactKey {
    pub fn new(
        tenant_domain: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            tenant_domain: tenant_domain.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.tenant_domain, self.name, self.version)
    }
}

/// Reference from a mediation artifact to the API it belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiRef {
    pub name: String,
    pub version: String,
}

impl ApiRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn matches(&self, name: &str, version: &str) -> bool {
        self.name == name && self.version == version
    }
}

/// A deployed unit of gateway configuration
///
/// The payload is opaque here; its format belongs to the execution engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub kind: ArtifactKind,
    pub payload: String,

    /// Event version that produced this value
    pub version: u64,

    pub deployed_at: DateTime<Utc>,

    pub content_hash: String,

    /// Parent API for sequences, endpoints and local entries bound to one API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiRef>,
}

impl Artifact {
    pub fn new(
        key: ArtifactKey,
        kind: ArtifactKind,
        payload: impl Into<String>,
        version: u64,
    ) -> Self {
        let payload = payload.into();
        let content_hash = content_hash(kind, &payload);
        Self {
            key,
            kind,
            payload,
            version,
            deployed_at: Utc::now(),
            content_hash,
            api: None,
        }
    }

    pub fn with_api(mut self, api: ApiRef) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_deployed_at(mut self, at: DateTime<Utc>) -> Self {
        self.deployed_at = at;
        self
    }

    pub fn is_api(&self) -> bool {
        self.kind == ArtifactKind::Api
    }

    /// Whether this artifact is a sequence attached to the given API
    pub fn is_sequence_of(&self, name: &str, version: &str) -> bool {
        self.kind == ArtifactKind::Sequence
            && self.api.as_ref().map(|a| a.matches(name, version)).unwrap_or(false)
    }

    /// Same deployable content, ignoring version and timestamps
    pub fn same_content(&self, other: &Artifact) -> bool {
        self.kind == other.kind && self.content_hash == other.content_hash && self.api == other.api
    }
}

/// SHA-256 over kind and payload, hex encoded
pub fn content_hash(kind: ArtifactKind, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.path_segment().as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

//! Data models for the deployment registry
//!
//! This module contains the artifact, key and event types shared by the
//! store, the synchronizer and the query gateway.

mod artifact;
mod event;

pub use artifact::{content_hash, ApiRef, Artifact, ArtifactKey, ArtifactKind};
pub use event::{ApplyState, DeploymentEvent, EventOp, FeedMessage};

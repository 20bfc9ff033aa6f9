//! Query gateway
//!
//! Read-only view over the artifact store for the REST layer. Queries never
//! contact the control plane or the engine.

mod gateway;

pub use gateway::QueryGateway;

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Query failures; absence is not one of them
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Artifact store fault: {0}")]
    Store(#[from] StoreError),
}

/// HTTP-equivalent answer for the REST layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: 404,
            body: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            body: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

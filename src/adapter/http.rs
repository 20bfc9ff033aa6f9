//! HTTP proxy adapter
//!
//! Pushes artifacts to the engine admin REST surface:
//! `PUT {base}/{kind}/{tenant}/{name}/{version}` with the payload as body,
//! `DELETE` on the same path to undeploy.

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use crate::http::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::models::{Artifact, ArtifactKey, ArtifactKind};

use super::{AdapterError, ProxyAdapter};

/// Header carrying the content hash so the engine can skip duplicate pushes
pub const CONTENT_HASH_HEADER: &str = "X-Artifact-Content-Hash";

/// Header carrying the tenant domain
pub const TENANT_HEADER: &str = "X-Tenant-Domain";

/// Adapter for one artifact kind over HTTP
#[derive(Clone, Debug)]
pub struct HttpEngineAdapter {
    client: HttpClient,
    kind: ArtifactKind,
}

impl HttpEngineAdapter {
    pub fn new(client: HttpClient, kind: ArtifactKind) -> Self {
        Self { client, kind }
    }

    fn artifact_url(&self, key: &ArtifactKey) -> Result<String, AdapterError> {
        let mut url = Url::parse(self.client.base_url())
            .map_err(|e| AdapterError::Unavailable(format!("invalid engine url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AdapterError::Unavailable("engine url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend([
                self.kind.path_segment(),
                key.tenant_domain.as_str(),
                key.name.as_str(),
                key.version.as_str(),
            ]);
        Ok(url.to_string())
    }

    fn classify(&self, key: &ArtifactKey, response: HttpResponse) -> Result<(), AdapterError> {
        if response.is_success() {
            return Ok(());
        }
        if response.is_client_error() {
            return Err(AdapterError::Rejected {
                key: key.clone(),
                reason: format!("status {}: {}", response.status_code, response.body.trim()),
            });
        }
        Err(AdapterError::Unavailable(format!(
            "engine returned status {}",
            response.status_code
        )))
    }
}

impl From<HttpError> for AdapterError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout(ms) => AdapterError::Timeout(ms),
            other => AdapterError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl ProxyAdapter for HttpEngineAdapter {
    async fn deploy(&self, artifact: &Artifact) -> Result<(), AdapterError> {
        let url = self.artifact_url(&artifact.key)?;
        debug!("Pushing {} {} to {}", artifact.kind, artifact.key, url);

        let request = HttpRequest::put(url)
            .header(CONTENT_HASH_HEADER, artifact.content_hash.as_str())
            .header(TENANT_HEADER, artifact.key.tenant_domain.as_str())
            .body(artifact.payload.as_str());

        let response = self.client.send(request).await?;
        self.classify(&artifact.key, response)
    }

    async fn undeploy(&self, key: &ArtifactKey) -> Result<(), AdapterError> {
        let url = self.artifact_url(key)?;
        debug!("Removing {} {} via {}", self.kind, key, url);

        let request = HttpRequest::delete(url).header(TENANT_HEADER, key.tenant_domain.as_str());
        let response = self.client.send(request).await?;

        // Already gone counts as undeployed.
        if response.status_code == 404 {
            return Ok(());
        }
        self.classify(key, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(kind: ArtifactKind) -> HttpEngineAdapter {
        let client = HttpClient::new("http://engine:9443/admin", 1000).unwrap();
        HttpEngineAdapter::new(client, kind)
    }

    #[test]
    fn test_artifact_url_escapes_segments() {
        let key = ArtifactKey::new("t1.com", "Pet Store", "v1");
        let url = adapter(ArtifactKind::Api).artifact_url(&key).unwrap();
        assert_eq!(url, "http://engine:9443/admin/apis/t1.com/Pet%20Store/v1");
    }

    #[test]
    fn test_local_entry_path() {
        let key = ArtifactKey::new("t1", "Vault", "v1");
        let url = adapter(ArtifactKind::LocalEntry).artifact_url(&key).unwrap();
        assert!(url.ends_with("/local-entries/t1/Vault/v1"));
    }

    #[test]
    fn test_classify_status() {
        let adapter = adapter(ArtifactKind::Api);
        let key = ArtifactKey::new("t1", "PetStore", "v1");
        let response = |status_code| HttpResponse {
            status_code,
            body: "bad payload".to_string(),
            duration_ms: 1,
        };

        assert!(adapter.classify(&key, response(200)).is_ok());
        assert!(matches!(
            adapter.classify(&key, response(400)),
            Err(AdapterError::Rejected { .. })
        ));
        assert!(matches!(
            adapter.classify(&key, response(503)),
            Err(AdapterError::Unavailable(_))
        ));
    }

    #[test]
    fn test_timeout_maps_to_adapter_timeout() {
        assert_eq!(AdapterError::from(HttpError::Timeout(500)), AdapterError::Timeout(500));
    }
}

//! HTTP client for the engine admin surface
//!
//! Thin wrapper over reqwest that classifies transport failures so the
//! synchronizer can tell retryable faults from rejected payloads.

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method,
};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// HTTP client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// HTTP client bound to one base URL
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    default_headers: HeaderMap,
    timeout_ms: u64,
}

impl HttpClient {
    /// Create client with custom timeout
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_headers: HeaderMap::new(),
            timeout_ms,
        })
    }

    /// Add default header
    pub fn default_header(
        mut self,
        key: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, HttpError> {
        let header_name = HeaderName::from_bytes(key.as_ref().as_bytes())
            .map_err(|e| HttpError::InvalidRequest(format!("header name: {e}")))?;
        let header_value = HeaderValue::from_str(value.as_ref())
            .map_err(|e| HttpError::InvalidRequest(format!("header value: {e}")))?;
        self.default_headers.insert(header_name, header_value);
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build full URL
    fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Send HTTP request
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = self.build_url(&request.path);
        debug!("Sending {} request to {}", request.method, url);

        let mut req_builder = self.client.request(request.method.clone(), &url);

        for (key, value) in &self.default_headers {
            req_builder = req_builder.header(key, value);
        }

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let start = std::time::Instant::now();

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(self.timeout_ms)
            } else if e.is_connect() {
                HttpError::ConnectionRefused(url.clone())
            } else {
                HttpError::RequestFailed(e.to_string())
            }
        })?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::RequestFailed(format!("reading body: {e}")))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!("Response: {} from {} in {}ms", status_code, url, duration_ms);

        Ok(HttpResponse {
            status_code,
            body,
            duration_ms,
        })
    }
}

/// HTTP request builder
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// HTTP response
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
    pub duration_ms: u64,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_builder() {
        let req = HttpRequest::put("/apis/t1/PetStore/v1")
            .header("X-Content-Hash", "abc")
            .body("<api/>");

        assert_eq!(req.method, Method::PUT);
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.body.as_deref(), Some("<api/>"));
    }

    #[test]
    fn test_build_url() {
        let client = HttpClient::new("http://engine:9443/admin/", 1000).unwrap();
        assert_eq!(
            client.build_url("/apis/t1/PetStore/v1"),
            "http://engine:9443/admin/apis/t1/PetStore/v1"
        );
        assert_eq!(client.build_url("https://other/x"), "https://other/x");
    }

    #[test]
    fn test_http_response_classes() {
        let resp = HttpResponse {
            status_code: 503,
            body: String::new(),
            duration_ms: 3,
        };
        assert!(!resp.is_success());
        assert!(!resp.is_client_error());
    }
}

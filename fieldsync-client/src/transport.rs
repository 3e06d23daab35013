//! HTTP transport seam.
//!
//! The executor only sees [`HttpTransport`]; [`ReqwestTransport`] is the
//! production implementation.

use async_trait::async_trait;
use fieldsync_core::ClientConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::error::RequestError;
use crate::request::ApiRequest;

/// Status and body text of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    /// No response was received.
    #[error("{0}")]
    Network(String),
    /// The request could not be built.
    #[error("{0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl ReqwestTransport {
    /// Per-attempt timeouts are enforced by the executor, so the client
    /// itself is built without one.
    pub fn new(config: &ClientConfig) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RequestError::Config(e.to_string()))?;
        let default_headers = build_auth_headers(config.auth.bearer_token.as_deref())?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            default_headers,
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let mut headers = self.default_headers.clone();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(request.method.clone(), self.url_for(&request.path))
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(RawResponse { status, body })
    }
}

fn build_auth_headers(bearer_token: Option<&str>) -> Result<HeaderMap, RequestError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer_token {
        let value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| RequestError::Config(e.to_string()))?,
        );
    }
    Ok(headers)
}

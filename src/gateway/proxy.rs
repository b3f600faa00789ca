//! Authenticated passthrough to the downstream model backend.
//!
//! Only requests that passed the guard get here. The caller's credential
//! headers are dropped; the backend learns who is calling from
//! `x-authenticated-subject` instead.

use std::time::Duration;

use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use super::auth::AuthenticatedSubject;

/// Header naming the authenticated subject on forwarded requests.
pub const SUBJECT_HEADER: &str = "x-authenticated-subject";
/// Header naming the bound device on forwarded requests.
pub const DEVICE_HEADER: &str = "x-authenticated-device";

/// Proxy failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No backend URL is configured.
    #[error("No upstream backend configured")]
    NotConfigured,

    /// The backend could not be reached or did not answer.
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Response streaming is not offered by this gateway.
    #[error("Streaming responses are not supported")]
    StreamingUnsupported,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotConfigured => (StatusCode::INTERNAL_SERVER_ERROR, "not_configured"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            Self::StreamingUnsupported => (StatusCode::NOT_IMPLEMENTED, "not_implemented"),
        };
        (status, Json(json!({ "error": code, "message": self.to_string() }))).into_response()
    }
}

/// Forwards requests to the configured backend.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    http: reqwest::Client,
    base_url: Option<Url>,
}

impl UpstreamProxy {
    /// Create a proxy for `base_url` (or an unconfigured one).
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL.
    pub fn new(base_url: Option<&str>, timeout: Duration) -> crate::Result<Self> {
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .map(|u| {
                Url::parse(u.trim_end_matches('/'))
                    .map_err(|e| crate::Error::Config(format!("Invalid upstream URL {u:?}: {e}")))
            })
            .transpose()?;
        if base_url.is_none() {
            warn!("No upstream backend configured; proxied requests will fail");
        }
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url,
        })
    }

    /// Absolute backend URL for `path` (and `query`, if any).
    pub fn target(&self, path: &str, query: Option<&str>) -> Result<Url, ProxyError> {
        let base = self.base_url.as_ref().ok_or(ProxyError::NotConfigured)?;
        let mut url = base.clone();
        let joined = format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(query.filter(|q| !q.is_empty()));
        Ok(url)
    }

    /// Forward one request and relay the backend's answer.
    pub async fn forward(
        &self,
        path: &str,
        query: Option<&str>,
        subject: &AuthenticatedSubject,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, ProxyError> {
        let url = self.target(path, query)?;
        debug!(subject = %subject.subject, %url, "Forwarding request");

        let mut outbound = HeaderMap::new();
        for name in [header::CONTENT_TYPE, header::ACCEPT] {
            if let Some(value) = headers.get(&name) {
                outbound.insert(name, value.clone());
            }
        }
        if let Ok(value) = HeaderValue::from_str(&subject.subject) {
            outbound.insert(SUBJECT_HEADER, value);
        }
        if let Some(value) = subject
            .device_id
            .as_deref()
            .and_then(|device| HeaderValue::from_str(device).ok())
        {
            outbound.insert(DEVICE_HEADER, value);
        }

        let upstream = self
            .http
            .post(url)
            .headers(outbound)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Upstream request failed");
                ProxyError::Upstream(e.to_string())
            })?;

        let status = upstream.status();
        let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        if let Some(content_type) = content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        Ok(response)
    }
}

/// `POST /invoke`
pub async fn invoke(
    State(proxy): State<std::sync::Arc<UpstreamProxy>>,
    Extension(subject): Extension<AuthenticatedSubject>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    proxy
        .forward("invoke", query.as_deref(), &subject, &headers, body)
        .await
}

/// `POST /v1/{*path}`
pub async fn v1(
    State(proxy): State<std::sync::Arc<UpstreamProxy>>,
    Extension(subject): Extension<AuthenticatedSubject>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    proxy
        .forward(&format!("v1/{path}"), query.as_deref(), &subject, &headers, body)
        .await
}

/// `POST /invoke-with-response-stream`
pub async fn invoke_stream() -> ProxyError {
    ProxyError::StreamingUnsupported
}

//! Auth service client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::ClientError;
use crate::auth::AuthService;
use crate::auth::handler::{RefreshRequest, VerifyRequest};
use crate::clock::Clock;
use crate::token::{TokenPair, TokenResponse};

/// The two auth service operations the client needs.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange an issuer identity token for a pair.
    async fn verify(&self, id_token: &str, device_id: Option<&str>)
    -> Result<TokenPair, ClientError>;

    /// Rotate a refresh token into a new pair.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ClientError>;
}

/// [`AuthApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    http: reqwest::Client,
    base_url: String,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpAuthClient {
    /// Client for the auth service at `base_url`.
    pub fn new(base_url: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            clock,
        }
    }

    async fn post<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<TokenPair, ClientError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "Calling auth service");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message.or(b.error))
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(format!("invalid token response: {e}")))?;
        Ok(body.into_pair(self.clock.unix_now()))
    }
}

#[async_trait]
impl AuthApi for HttpAuthClient {
    async fn verify(
        &self,
        id_token: &str,
        device_id: Option<&str>,
    ) -> Result<TokenPair, ClientError> {
        let body = VerifyRequest {
            id_token: id_token.to_string(),
            device_id: device_id.map(str::to_string),
        };
        self.post("/auth/verify", &body).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ClientError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.post("/auth/refresh", &body).await
    }
}

/// In-process: the service itself, without HTTP.
#[async_trait]
impl AuthApi for AuthService {
    async fn verify(
        &self,
        id_token: &str,
        device_id: Option<&str>,
    ) -> Result<TokenPair, ClientError> {
        self.verify_and_issue(id_token, device_id)
            .await
            .map_err(rejected)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ClientError> {
        AuthService::refresh(self, refresh_token).map_err(rejected)
    }
}

fn rejected(err: crate::auth::AuthError) -> ClientError {
    ClientError::Rejected {
        status: err.status_code().as_u16(),
        message: err.to_string(),
    }
}

//! HTTP handlers for the auth service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/auth/verify` | Exchange an issuer identity token for a token pair |
//! | `POST` | `/auth/refresh` | Rotate a refresh token into a new pair |
//! | `GET` | `/health` | Liveness |
//!
//! Both token endpoints answer `{access_token, refresh_token, expires_in}`.
//! Failures answer `{"error": <code>, "message": <text>}`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AuthError, AuthService};
use crate::server::{Configured, health, with_common_layers};
use crate::token::TokenResponse;

/// `POST /auth/verify` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Issuer-signed identity token.
    pub id_token: String,
    /// Device the access token will be bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// `POST /auth/refresh` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// Internal refresh token.
    pub refresh_token: String,
}

type SharedService = Arc<Configured<AuthService>>;

/// Build the auth service router.
pub fn auth_router(service: Configured<AuthService>) -> Router {
    let routes = Router::new()
        .route("/auth/verify", post(verify))
        .route("/auth/refresh", post(refresh))
        .route("/health", get(health))
        .with_state(Arc::new(service));
    with_common_layers(routes)
}

async fn verify(
    State(service): State<SharedService>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let service = service.get()?;
    let pair = service
        .verify_and_issue(&body.id_token, body.device_id.as_deref())
        .await?;
    Ok(Json(TokenResponse::from_pair(pair, service.unix_now())))
}

async fn refresh(
    State(service): State<SharedService>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let service = service.get()?;
    let pair = service.refresh(&body.refresh_token)?;
    Ok(Json(TokenResponse::from_pair(pair, service.unix_now())))
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Server-side details stay in the logs
        let message = if self.is_server_fault() {
            "Authentication service unavailable".to_string()
        } else {
            self.to_string()
        };
        let body = Json(json!({ "error": self.code(), "message": message }));

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

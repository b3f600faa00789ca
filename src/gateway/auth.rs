//! Bearer-credential guard for the gateway.
//!
//! Credentials are read from, in order of preference:
//! - `Authorization: Bearer <token>`
//! - `X-Api-Key: <token>`
//!
//! Either way the value must be an internal **access** token. Requests that
//! fail are answered here and never reach the proxy.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::auth::{AuthError, InternalClaims, InternalTokenVerifier, audit};
use crate::clock::Clock;
use crate::config::Config;
use crate::server::Configured;
use crate::token::TokenType;

/// Header carrying an API-key style credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Identity attached to requests that passed the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject {
    /// Subject of the access token
    pub subject: String,
    /// Device the access token was bound to
    pub device_id: Option<String>,
}

impl From<InternalClaims> for AuthenticatedSubject {
    fn from(claims: InternalClaims) -> Self {
        Self {
            subject: claims.sub.unwrap_or_default(),
            device_id: claims.device_id,
        }
    }
}

/// Validates gateway credentials.
#[derive(Debug)]
pub struct GatewayAuthGuard {
    verifier: InternalTokenVerifier,
}

impl GatewayAuthGuard {
    /// Guard backed by `verifier`.
    #[must_use]
    pub fn new(verifier: InternalTokenVerifier) -> Self {
        Self { verifier }
    }

    /// Guard sharing the auth service's signing secret.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the secret is unset.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        config
            .validate_gateway()
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        Ok(Self::new(InternalTokenVerifier::new(
            config.tokens.signing_secret.as_bytes(),
            clock,
        )))
    }

    /// Authenticate a request by its headers.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingCredential`] when neither header is present, else
    /// whatever the access-token verification reports.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<InternalClaims, AuthError> {
        let credential = extract_credential(headers).ok_or(AuthError::MissingCredential)?;
        self.verifier.verify(credential, TokenType::Access)
    }
}

/// The presented credential, bearer first.
pub fn extract_credential(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty());

    bearer.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    })
}

/// Authentication middleware
pub async fn auth_middleware(
    State(guard): State<Arc<Configured<GatewayAuthGuard>>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let guard = match guard.get() {
        Ok(guard) => guard,
        Err(e) => return e.into_response(),
    };

    match guard.authenticate(request.headers()) {
        Ok(claims) => {
            let subject = AuthenticatedSubject::from(claims);
            debug!(subject = %subject.subject, path = %request.uri().path(), "Authenticated request");
            request.extensions_mut().insert(subject);
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, path = %request.uri().path(), "Gateway request rejected");
            if !matches!(e, AuthError::MissingCredential) {
                audit::emit(&audit::AuditEvent::rejected(TokenType::Access, e.to_string()));
            }
            unauthorized(e)
        }
    }
}

/// Every credential failure at the gateway is a 401.
fn unauthorized(err: AuthError) -> Response {
    if err.status_code() == StatusCode::UNAUTHORIZED {
        return err.into_response();
    }
    AuthError::InvalidClaims(err.to_string()).into_response()
}

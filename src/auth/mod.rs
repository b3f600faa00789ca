//! Token exchange service: issuer identity tokens in, internal token pairs out.
//!
//! # Operations
//!
//! 1. **Verify and issue** (`POST /auth/verify`): verify an issuer-signed
//!    identity token against the issuer's published keys and mint a new
//!    access/refresh pair for its subject.
//!
//! 2. **Refresh** (`POST /auth/refresh`): verify an internal refresh token and
//!    mint a new pair, rotating both tokens.
//!
//! The service keeps no sessions. Everything it knows about a caller is in the
//! tokens; the only state is the issuer metadata cache.
//!
//! ```text
//! id_token -> ExternalTokenVerifier -> subject -> InternalTokenIssuer -> TokenPair
//! refresh  -> InternalTokenVerifier -> subject -> InternalTokenIssuer -> TokenPair
//! ```

pub mod audit;
pub mod external;
pub mod handler;
pub mod internal;
pub mod keyset;

use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::token::{TokenPair, TokenType};

pub use audit::AuditEvent;
pub use external::{ExternalClaims, ExternalTokenVerifier};
pub use internal::{InternalClaims, InternalTokenIssuer, InternalTokenVerifier};
pub use keyset::{
    CachedDocument, DocumentCache, DocumentSource, HttpDocumentSource, InMemoryDocumentCache,
    KeySetCache,
};

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The service cannot operate with its current configuration.
    #[error("Service is not configured: {0}")]
    Configuration(String),

    /// The token is not a decodable JWT.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The token header names no signing key.
    #[error("Token header has no key id")]
    MissingKeyId,

    /// The issuer publishes no key with the token's key id.
    #[error("Unknown signing key: {0}")]
    UnknownSigningKey(String),

    /// Issuer, audience, expiry or subject checks failed.
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// Signature does not verify, or the algorithm is not the pinned one.
    #[error("Invalid signature")]
    InvalidSignature,

    /// An access token was presented where a refresh token was expected, or vice versa.
    #[error("Wrong token type: expected {expected}, got {actual:?}")]
    WrongTokenType {
        /// What the endpoint accepts
        expected: TokenType,
        /// The `type` claim found in the token
        actual: String,
    },

    /// The token names no subject.
    #[error("Token has no subject")]
    MissingSubject,

    /// No bearer or API-key credential on the request.
    #[error("No credential supplied")]
    MissingCredential,

    /// The issuer's discovery document or key set could not be fetched.
    #[error("Issuer metadata unavailable: {0}")]
    UpstreamFetchFailure(String),

    /// Unexpected failure while minting tokens.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status for this failure.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingSubject => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Short machine-readable code for the JSON error body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "not_configured",
            Self::Internal(_) => "internal_error",
            Self::MissingSubject => "missing_subject",
            Self::MissingCredential => "missing_credential",
            Self::WrongTokenType { .. } => "wrong_token_type",
            Self::UpstreamFetchFailure(_) => "issuer_unavailable",
            _ => "invalid_token",
        }
    }

    /// `true` for failures caused by the server rather than the caller.
    #[must_use]
    pub fn is_server_fault(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Orchestrates issuer verification and internal issuance.
#[derive(Debug)]
pub struct AuthService {
    external: ExternalTokenVerifier,
    issuer: InternalTokenIssuer,
    verifier: InternalTokenVerifier,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    /// Assemble a service from its parts.
    #[must_use]
    pub fn new(
        external: ExternalTokenVerifier,
        issuer: InternalTokenIssuer,
        verifier: InternalTokenVerifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            external,
            issuer,
            verifier,
            clock,
        }
    }

    /// Build the production service: HTTP metadata fetches and an in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if issuer or signing settings are missing.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        config
            .validate_auth_server()
            .map_err(|e| AuthError::Configuration(e.to_string()))?;

        let keys = Arc::new(KeySetCache::new(
            config.issuer.discovery_url(),
            config.discovery.cache_ttl(),
            Arc::new(InMemoryDocumentCache::new()),
            Arc::new(HttpDocumentSource::new(config.discovery.fetch_timeout())),
            clock.clone(),
        ));
        let external = ExternalTokenVerifier::new(
            keys,
            &config.issuer.expected_issuer(),
            &config.issuer.client_id,
        );

        let secret = config.tokens.signing_secret.as_bytes();
        let issuer = InternalTokenIssuer::new(
            secret,
            config.tokens.access_ttl_secs,
            config.tokens.refresh_ttl_secs,
            clock.clone(),
        );
        let verifier = InternalTokenVerifier::new(secret, clock.clone());

        info!(
            issuer = %config.issuer.expected_issuer(),
            access_ttl = config.tokens.access_ttl_secs,
            refresh_ttl = config.tokens.refresh_ttl_secs,
            "Auth service configured"
        );

        Ok(Self::new(external, issuer, verifier, clock))
    }

    /// Current Unix time as seen by the service.
    #[must_use]
    pub fn unix_now(&self) -> u64 {
        self.clock.unix_now()
    }

    /// Verify an issuer identity token and mint a new pair for its subject.
    ///
    /// Every success mints new, unrelated tokens; the same `id_token` twice
    /// yields two pairs.
    pub async fn verify_and_issue(
        &self,
        id_token: &str,
        device_id: Option<&str>,
    ) -> Result<TokenPair, AuthError> {
        let claims = match self.external.verify(id_token).await {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Issuer token verification failed");
                audit::emit(&AuditEvent::denied(e.to_string()));
                return Err(e);
            }
        };

        let subject = claims.subject().ok_or(AuthError::MissingSubject)?;
        let pair = self.issuer.issue(subject, device_id)?;

        audit::emit(&AuditEvent::issued(subject, device_id, pair.expires_at));
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair. Both tokens are renewed.
    ///
    /// The old refresh token is not invalidated; it stays usable until its
    /// own expiry.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = match self.verifier.verify(refresh_token, TokenType::Refresh) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Refresh token rejected");
                audit::emit(&AuditEvent::rejected(TokenType::Refresh, e.to_string()));
                return Err(e);
            }
        };

        let subject = claims.subject().ok_or(AuthError::MissingSubject)?;
        let pair = self.issuer.issue(subject, None)?;

        audit::emit(&AuditEvent::refreshed(subject, pair.expires_at));
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AuthError::Configuration("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AuthError::MissingSubject.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::MissingKeyId.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidSignature.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::UpstreamFetchFailure("down".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::WrongTokenType {
                expected: TokenType::Refresh,
                actual: "access".into()
            }
            .status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn server_faults_are_flagged() {
        assert!(AuthError::Internal("x".into()).is_server_fault());
        assert!(!AuthError::MissingCredential.is_server_fault());
    }

    #[test]
    fn unconfigured_service_refuses_to_build() {
        let result = AuthService::from_config(
            &Config::default(),
            Arc::new(crate::clock::SystemClock),
        );
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }
}

//! Internally minted HS256 tokens.
//!
//! One shared secret signs and verifies both token kinds; the `type` claim
//! tells them apart. Expiry is checked against the injected [`Clock`] with no
//! leeway.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::AuthError;
use crate::clock::Clock;
use crate::token::{TokenPair, TokenType};

/// Signing algorithm of internal tokens.
pub const INTERNAL_ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by internal access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalClaims {
    /// Subject the pair was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Device binding; access tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// `"access"` or `"refresh"`
    #[serde(rename = "type", default)]
    pub token_type: String,
    /// Issued at (Unix seconds)
    #[serde(default)]
    pub iat: u64,
    /// Expiry (Unix seconds)
    pub exp: u64,
    /// Unique token id
    #[serde(default)]
    pub jti: String,
}

impl InternalClaims {
    /// Non-empty subject, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.sub.as_deref().filter(|s| !s.is_empty())
    }
}

/// Mints access/refresh pairs.
pub struct InternalTokenIssuer {
    key: EncodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
    clock: Arc<dyn Clock>,
}

impl InternalTokenIssuer {
    /// Create an issuer signing with `secret`.
    #[must_use]
    pub fn new(
        secret: &[u8],
        access_ttl_secs: u64,
        refresh_ttl_secs: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
            access_ttl_secs,
            refresh_ttl_secs,
            clock,
        }
    }

    /// Mint a fresh pair for `subject`.
    ///
    /// Only the access token carries `device_id`. The pair's `expires_at` is
    /// the access token's expiry.
    pub fn issue(&self, subject: &str, device_id: Option<&str>) -> Result<TokenPair, AuthError> {
        let now = self.clock.unix_now();
        let access_exp = now.saturating_add(self.access_ttl_secs);

        let access = InternalClaims {
            sub: Some(subject.to_string()),
            device_id: device_id.map(str::to_string),
            token_type: TokenType::Access.as_str().to_string(),
            iat: now,
            exp: access_exp,
            jti: Uuid::new_v4().to_string(),
        };
        let refresh = InternalClaims {
            sub: Some(subject.to_string()),
            device_id: None,
            token_type: TokenType::Refresh.as_str().to_string(),
            iat: now,
            exp: now.saturating_add(self.refresh_ttl_secs),
            jti: Uuid::new_v4().to_string(),
        };

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            expires_at: access_exp,
        })
    }

    fn sign(&self, claims: &InternalClaims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(INTERNAL_ALGORITHM), claims, &self.key)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))
    }
}

impl std::fmt::Debug for InternalTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalTokenIssuer")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish_non_exhaustive()
    }
}

/// Verifies internal tokens of an expected kind.
pub struct InternalTokenVerifier {
    key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl InternalTokenVerifier {
    /// Create a verifier for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(INTERNAL_ALGORITHM);
        // Expiry is checked below against the injected clock
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            clock,
        }
    }

    /// Verify `token` and require its `type` claim to be `expected`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidSignature`] on any signature or format problem
    /// - [`AuthError::InvalidClaims`] once the token has expired
    /// - [`AuthError::WrongTokenType`] if `type` is not `expected`
    /// - [`AuthError::MissingSubject`] if `sub` is absent or empty
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<InternalClaims, AuthError> {
        let claims = jsonwebtoken::decode::<InternalClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "Internal token rejected");
                AuthError::InvalidSignature
            })?
            .claims;

        if claims.exp < self.clock.unix_now() {
            return Err(AuthError::InvalidClaims("token expired".to_string()));
        }

        if claims.token_type != expected.as_str() {
            return Err(AuthError::WrongTokenType {
                expected,
                actual: claims.token_type,
            });
        }

        if claims.subject().is_none() {
            return Err(AuthError::MissingSubject);
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for InternalTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalTokenVerifier").finish_non_exhaustive()
    }
}

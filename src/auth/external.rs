//! Verification of issuer-signed identity tokens.
//!
//! # Verification order
//!
//! 1. Decode the header without verifying anything; read `kid`.
//! 2. Look `kid` up in the cached key set (fetching it when stale).
//! 3. Verify the signature with RS256 only. The header's `alg` is compared
//!    against the pinned algorithm and never used to choose one.
//! 4. Check `iss`, `aud` and `exp` (60 seconds of leeway).

use std::sync::Arc;

use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    errors::ErrorKind,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AuthError, keyset::KeySetCache};

/// The only algorithm issuer tokens may be signed with.
pub const ISSUER_ALGORITHM: Algorithm = Algorithm::RS256;

/// Clock skew tolerated between the issuer and this host.
const LEEWAY_SECS: u64 = 60;

/// Claims read from a verified issuer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalClaims {
    /// Issuer
    pub iss: String,
    /// Object id, the issuer's stable per-user identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Expiry (Unix seconds)
    pub exp: u64,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sign-in name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

impl ExternalClaims {
    /// The subject to mint internal tokens for: `oid` when present, else `sub`.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        [self.oid.as_deref(), self.sub.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
    }
}

/// Verifies issuer tokens against the issuer's published keys.
#[derive(Debug)]
pub struct ExternalTokenVerifier {
    keys: Arc<KeySetCache>,
    validation: Validation,
}

impl ExternalTokenVerifier {
    /// Accept tokens with `iss == expected_issuer` and `aud == audience`.
    #[must_use]
    pub fn new(keys: Arc<KeySetCache>, expected_issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(ISSUER_ALGORITHM);
        validation.set_issuer(&[expected_issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = LEEWAY_SECS;
        Self { keys, validation }
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] if the header cannot be decoded
    /// - [`AuthError::MissingKeyId`] if the header has no `kid`
    /// - [`AuthError::UpstreamFetchFailure`] if the key set cannot be fetched
    /// - [`AuthError::UnknownSigningKey`] if no RSA key has that `kid`
    /// - [`AuthError::InvalidSignature`] on a bad signature or unexpected `alg`
    /// - [`AuthError::InvalidClaims`] on issuer, audience, expiry or subject problems
    pub async fn verify(&self, token: &str) -> Result<ExternalClaims, AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::MalformedToken(e.to_string()))?;

        let kid = header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(AuthError::MissingKeyId)?;

        let jwks = self.keys.key_set().await?;
        let key = find_rsa_key(&jwks, kid)
            .ok_or_else(|| AuthError::UnknownSigningKey(kid.to_string()))?;

        if header.alg != ISSUER_ALGORITHM {
            warn!(alg = ?header.alg, kid, "Rejecting issuer token with unexpected algorithm");
            return Err(AuthError::InvalidSignature);
        }

        let data = jsonwebtoken::decode::<ExternalClaims>(token, &key, &self.validation)
            .map_err(classify)?;

        if data.claims.subject().is_none() {
            return Err(AuthError::InvalidClaims(
                "token carries neither oid nor sub".to_string(),
            ));
        }

        debug!(kid, "Issuer token verified");
        Ok(data.claims)
    }
}

/// Find an RSA key by `kid`. Keys of other families never match.
fn find_rsa_key(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        _ => None,
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::Json(_) => AuthError::InvalidClaims(err.to_string()),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
            AuthError::MalformedToken(err.to_string())
        }
        _ => AuthError::InvalidSignature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(oid: Option<&str>, sub: Option<&str>) -> ExternalClaims {
        ExternalClaims {
            iss: "https://issuer.test/v2.0".to_string(),
            oid: oid.map(str::to_string),
            sub: sub.map(str::to_string),
            exp: 0,
            name: None,
            preferred_username: None,
        }
    }

    #[test]
    fn subject_prefers_oid() {
        assert_eq!(claims(Some("o"), Some("s")).subject(), Some("o"));
        assert_eq!(claims(None, Some("s")).subject(), Some("s"));
        assert_eq!(claims(Some(""), Some("s")).subject(), Some("s"));
        assert_eq!(claims(None, None).subject(), None);
    }

    #[test]
    fn only_rsa_keys_are_selected() {
        let jwks: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [
                { "kty": "oct", "kid": "sym", "k": "c2VjcmV0" },
                { "kty": "RSA", "kid": "rsa", "n": "sXch", "e": "AQAB" }
            ]
        }))
        .unwrap();

        assert!(find_rsa_key(&jwks, "sym").is_none());
        assert!(find_rsa_key(&jwks, "rsa").is_some());
        assert!(find_rsa_key(&jwks, "absent").is_none());
    }

    #[test]
    fn error_kinds_map_to_taxonomy() {
        let expired = jsonwebtoken::errors::Error::from(ErrorKind::ExpiredSignature);
        assert!(matches!(classify(expired), AuthError::InvalidClaims(_)));

        let bad_sig = jsonwebtoken::errors::Error::from(ErrorKind::InvalidSignature);
        assert!(matches!(classify(bad_sig), AuthError::InvalidSignature));

        let garbage = jsonwebtoken::errors::Error::from(ErrorKind::InvalidToken);
        assert!(matches!(classify(garbage), AuthError::MalformedToken(_)));
    }
}

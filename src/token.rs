//! Token shapes shared by the issuing service and the client cache.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An internally minted access/refresh pair.
///
/// `expires_at` is the access token's expiry (Unix seconds), computed when the
/// pair is issued. It is never taken from the token text itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived bearer credential for API calls.
    pub access_token: String,
    /// Long-lived credential used only to obtain a new pair.
    pub refresh_token: String,
    /// Access token expiry, Unix seconds.
    pub expires_at: u64,
}

impl TokenPair {
    /// `true` while `now < expires_at - margin`.
    #[must_use]
    pub fn is_fresh(&self, now: u64, margin_secs: u64) -> bool {
        now < self.expires_at.saturating_sub(margin_secs)
    }

    /// Seconds of access-token validity left at `now` (zero once expired).
    #[must_use]
    pub fn remaining_secs(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

// Manual impl so tokens never end up in logs through `{:?}`.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Kind of internal token, carried in the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Bearer credential accepted by the gateway.
    Access,
    /// Credential accepted only by the refresh endpoint.
    Refresh,
}

impl TokenType {
    /// Claim value as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body returned by `/auth/verify` and `/auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed access token.
    pub access_token: String,
    /// Signed refresh token.
    pub refresh_token: String,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

impl TokenResponse {
    /// Build the wire response for a pair issued at `now`.
    #[must_use]
    pub fn from_pair(pair: TokenPair, now: u64) -> Self {
        let expires_in = pair.remaining_secs(now);
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in,
        }
    }

    /// Turn a wire response received at `now` back into a pair.
    #[must_use]
    pub fn into_pair(self, now: u64) -> TokenPair {
        TokenPair {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now.saturating_add(self.expires_in),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(expires_at: u64) -> TokenPair {
        TokenPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at,
        }
    }

    #[test]
    fn fresh_until_margin_boundary() {
        // GIVEN: a pair expiring at t=10800 and a 300s margin
        let token = pair(10_800);

        // THEN: fresh strictly before 10500, stale from 10500 on
        assert!(token.is_fresh(0, 300));
        assert!(token.is_fresh(10_499, 300));
        assert!(!token.is_fresh(10_500, 300));
        assert!(!token.is_fresh(20_000, 300));
    }

    #[test]
    fn margin_larger_than_lifetime_is_never_fresh() {
        let token = pair(100);
        assert!(!token.is_fresh(0, 300));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let rendered = format!("{:?}", pair(1));
        assert!(!rendered.contains("\"a\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn token_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TokenType::Refresh).unwrap(), "\"refresh\"");
        assert_eq!(TokenType::Access.to_string(), "access");
    }

    #[test]
    fn response_round_trips_expiry_relative_to_receipt() {
        // GIVEN: a pair issued at t=1000 with a 3h lifetime
        let response = TokenResponse::from_pair(pair(1_000 + 10_800), 1_000);
        assert_eq!(response.expires_in, 10_800);

        // WHEN: a client receives it at t=1002
        let received = response.into_pair(1_002);

        // THEN: expiry is anchored to the receipt time
        assert_eq!(received.expires_at, 1_002 + 10_800);
    }

    #[test]
    fn absurd_expires_in_saturates() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: u64::MAX,
        };

        let received = response.into_pair(1_700_000_000);

        assert_eq!(received.expires_at, u64::MAX);
    }
}

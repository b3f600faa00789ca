//! Audit trail for internal token lifecycle events.
//!
//! Every event is emitted via `tracing::info!` as a JSON blob in the `audit`
//! field, so log aggregators can pick it out without parsing messages.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `token.issued` | An issuer token was exchanged for a new pair |
//! | `token.refreshed` | A refresh token was rotated into a new pair |
//! | `token.denied` | An issuer token failed verification |
//! | `token.rejected` | An internal token failed verification |

use serde::Serialize;

use crate::token::TokenType;

/// Structured audit event. Never carries token text.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"token.issued"`).
    pub event: &'static str,
    /// Subject the event concerns, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Device binding of an issued access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Kind of internal token involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
    /// Expiry of the issued access token (Unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Human-readable reason for denial or rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn blank(event: &'static str) -> Self {
        Self {
            event,
            subject: None,
            device_id: None,
            token_type: None,
            expires_at: None,
            reason: None,
        }
    }

    /// `token.issued`
    #[must_use]
    pub fn issued(subject: &str, device_id: Option<&str>, expires_at: u64) -> Self {
        Self {
            subject: Some(subject.to_string()),
            device_id: device_id.map(str::to_string),
            expires_at: Some(expires_at),
            ..Self::blank("token.issued")
        }
    }

    /// `token.refreshed`
    #[must_use]
    pub fn refreshed(subject: &str, expires_at: u64) -> Self {
        Self {
            subject: Some(subject.to_string()),
            token_type: Some(TokenType::Refresh),
            expires_at: Some(expires_at),
            ..Self::blank("token.refreshed")
        }
    }

    /// `token.denied`
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::blank("token.denied")
        }
    }

    /// `token.rejected`
    #[must_use]
    pub fn rejected(token_type: TokenType, reason: impl Into<String>) -> Self {
        Self {
            token_type: Some(token_type),
            reason: Some(reason.into()),
            ..Self::blank("token.rejected")
        }
    }
}

/// Emit an audit event.
///
/// ```text
/// INFO tokenbridge::auth::audit: token audit audit={"event":"token.issued",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "token audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

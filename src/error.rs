//! Error types for tokenbridge

use std::io;

use thiserror::Error;

/// Result type alias for tokenbridge
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level errors (configuration, serving, IO).
///
/// Authentication failures have their own taxonomy in
/// [`AuthError`](crate::auth::AuthError); client-side failures live in
/// [`ClientError`](crate::client::ClientError).
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Process exit code for this error when surfaced from the CLI.
    ///
    /// Follows the `sysexits.h` convention for configuration errors so
    /// supervisors can tell a broken deployment from a transient failure.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 78,
            _ => 1,
        }
    }
}

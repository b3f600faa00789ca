//! tokenbridge
//!
//! Trades issuer identity tokens for short-lived internal bearer tokens, and
//! guards a model gateway with them.
//!
//! # Components
//!
//! - [`auth`]: issuer token verification (JWKS cached), internal token
//!   issuing and verification, the `/auth/*` HTTP API
//! - [`gateway`]: bearer guard and proxy in front of a downstream backend
//! - [`client`]: on-disk token cache with background refresh
//!
//! ```text
//! client --id token--> auth service --pair--> client --access token--> gateway --> backend
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod server;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` wins over `level`. Output goes to stderr so stdout stays free
/// for command output such as `get-token`.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        Some("text") | None => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        Some(other) => {
            return Err(Error::Config(format!(
                "Unknown log format {other:?} (expected text or json)"
            )));
        }
    };
    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}

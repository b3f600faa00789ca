//! Client side: keep a usable access token on disk without bothering the user.
//!
//! - [`store`]: atomic on-disk persistence of the current pair
//! - [`api`]: talking to the auth service
//! - [`identity`]: obtaining an issuer identity token (device code, Azure CLI)
//! - [`device`]: best-effort device identifier
//! - [`cache`]: the state machine tying them together, plus the refresh loop

pub mod api;
pub mod cache;
pub mod device;
pub mod identity;
pub mod store;

use std::time::Duration;

use thiserror::Error;

pub use api::{AuthApi, HttpAuthClient};
pub use cache::{CacheStatus, ClientTokenCache};
pub use device::{DeviceIdSource, FixedDeviceId, PlatformDeviceId};
pub use identity::{AzureCliProvider, ChainedIdentityProvider, DeviceCodeFlow, IdentityProvider};
pub use store::TokenStore;

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The identity provider flow failed.
    #[error("Identity flow failed: {0}")]
    Identity(String),

    /// The identity provider flow did not finish in time.
    #[error("Identity flow timed out after {0:?}")]
    Timeout(Duration),

    /// The identity provider flow was cancelled.
    #[error("Identity flow cancelled")]
    Cancelled,

    /// The auth service answered with an error.
    #[error("Auth service rejected the request ({status}): {message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// The auth service could not be reached.
    #[error("Auth service unreachable: {0}")]
    Transport(String),

    /// Reading or writing the token file failed.
    #[error("Token storage error: {0}")]
    Storage(String),
}

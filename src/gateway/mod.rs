//! Model gateway: internal access tokens in front of a downstream backend.
//!
//! ```text
//! request -> auth_middleware (GatewayAuthGuard) -> proxy -> upstream backend
//!                 | 401 / 500
//! ```

pub mod auth;
pub mod proxy;
pub mod router;

pub use auth::{AuthenticatedSubject, GatewayAuthGuard};
pub use proxy::{ProxyError, UpstreamProxy};
pub use router::gateway_router;

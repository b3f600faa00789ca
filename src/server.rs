//! HTTP serving shared by the auth service and the gateway.

use std::fmt::Display;
use std::net::SocketAddr;

use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::auth::AuthError;
use crate::{Error, Result};

/// A component that is either ready, or known to be misconfigured.
///
/// Services start even when misconfigured so that `/health` answers; protected
/// endpoints then fail with [`AuthError::Configuration`].
#[derive(Debug)]
pub enum Configured<T> {
    /// Usable
    Ready(T),
    /// Not usable; the reason is reported on every use
    Unconfigured(String),
}

impl<T> Configured<T> {
    /// Wrap a construction result, logging the failure once at startup.
    pub fn from_result<E: Display>(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(e) => {
                error!(error = %e, "Starting unconfigured; protected endpoints will fail");
                Self::Unconfigured(e.to_string())
            }
        }
    }

    /// The ready value, or a configuration error.
    pub fn get(&self) -> std::result::Result<&T, AuthError> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Unconfigured(reason) => {
                error!(reason = %reason, "Request refused: service is not configured");
                Err(AuthError::Configuration(reason.clone()))
            }
        }
    }

    /// `true` when ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// `GET /health`: liveness only.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Layers every router gets: panic recovery, request tracing, request ids.
pub fn with_common_layers(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Parse a listen address.
pub fn listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip = host
        .parse()
        .map_err(|e| Error::Config(format!("Invalid host {host:?}: {e}")))?;
    Ok(SocketAddr::new(ip, port))
}

/// Serve `app` on `addr` until Ctrl+C or SIGTERM.
pub async fn serve(name: &'static str, addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(service = name, %addr, version = env!("CARGO_PKG_VERSION"), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    info!(service = name, "Stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

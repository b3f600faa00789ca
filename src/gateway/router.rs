//! Gateway HTTP router

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use super::auth::{GatewayAuthGuard, auth_middleware};
use super::proxy::{UpstreamProxy, invoke, invoke_stream, v1};
use crate::server::{Configured, health, with_common_layers};

/// Create the gateway router.
///
/// `/health` is public; everything else passes the guard first.
pub fn gateway_router(guard: Configured<GatewayAuthGuard>, proxy: UpstreamProxy) -> Router {
    let protected = Router::new()
        .route("/invoke", post(invoke))
        .route("/invoke-with-response-stream", post(invoke_stream))
        .route("/v1/{*path}", post(v1))
        .with_state(Arc::new(proxy))
        .layer(middleware::from_fn_with_state(Arc::new(guard), auth_middleware));

    let app = Router::new().route("/health", get(health)).merge(protected);
    with_common_layers(app)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{InternalTokenIssuer, InternalTokenVerifier};
    use crate::clock::ManualClock;

    const SECRET: &[u8] = b"router-test-secret-with-enough-bytes";

    fn app() -> (Router, InternalTokenIssuer) {
        let clock = Arc::new(ManualClock::starting_at(1_700_000_000));
        let guard = GatewayAuthGuard::new(InternalTokenVerifier::new(SECRET, clock.clone()));
        let proxy = UpstreamProxy::new(None, Duration::from_secs(1)).unwrap();
        (
            gateway_router(Configured::Ready(guard), proxy),
            InternalTokenIssuer::new(SECRET, 3600, 86_400, clock),
        )
    }

    #[tokio::test]
    async fn health_needs_no_credential() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_credential_is_401_with_challenge() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::post("/invoke").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[tokio::test]
    async fn streaming_route_is_501_after_auth() {
        let (app, issuer) = app();
        let pair = issuer.issue("user-1", None).unwrap();

        let response = app
            .oneshot(
                Request::post("/invoke-with-response-stream")
                    .header(header::AUTHORIZATION, format!("Bearer {}", pair.access_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn unconfigured_guard_is_500() {
        let proxy = UpstreamProxy::new(None, Duration::from_secs(1)).unwrap();
        let app = gateway_router(Configured::Unconfigured("no secret".into()), proxy);

        let response = app
            .oneshot(
                Request::post("/invoke")
                    .header(header::AUTHORIZATION, "Bearer anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Obtaining an issuer identity token.
//!
//! Two providers:
//! - [`DeviceCodeFlow`]: RFC 8628 device authorization against the issuer.
//!   The user finishes sign-in in a browser while we poll.
//! - [`AzureCliProvider`]: reuse an existing `az login` session.
//!
//! Both honour a [`CancellationToken`]; the device flow is additionally
//! bounded by a timeout and by the device code's own lifetime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ClientError;
use crate::config::{ClientConfig, IssuerConfig};

/// Grant type used when polling the token endpoint.
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Added to the poll interval on `slow_down`.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Poll interval when the issuer does not advertise one.
const DEFAULT_INTERVAL_SECS: u64 = 5;

/// A way to obtain an issuer identity token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Obtain an identity token.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<String, ClientError>;
}

#[derive(Debug, Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenSuccess {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenFailure {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// RFC 8628 device authorization grant.
#[derive(Debug, Clone)]
pub struct DeviceCodeFlow {
    http: reqwest::Client,
    client_id: String,
    scopes: String,
    device_code_url: String,
    token_url: String,
    timeout: Duration,
}

impl DeviceCodeFlow {
    /// Flow against explicit endpoints.
    pub fn new(
        client_id: impl Into<String>,
        scopes: &[String],
        device_code_url: impl Into<String>,
        token_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            client_id: client_id.into(),
            scopes: scopes.join(" "),
            device_code_url: device_code_url.into(),
            token_url: token_url.into(),
            timeout,
        }
    }

    /// Flow against the configured issuer.
    pub fn from_config(issuer: &IssuerConfig, client: &ClientConfig) -> Self {
        Self::new(
            issuer.client_id.clone(),
            &issuer.scopes,
            issuer.device_code_url(),
            issuer.token_url(),
            Duration::from_secs(client.identity_timeout_secs),
        )
    }

    async fn start(&self) -> Result<DeviceAuthorization, ClientError> {
        let response = self
            .http
            .post(&self.device_code_url)
            .form(&[("client_id", self.client_id.as_str()), ("scope", self.scopes.as_str())])
            .send()
            .await
            .map_err(|e| ClientError::Identity(format!("device code request failed: {e}")))?;

        if !response.status().is_success() {
            let failure = response.json::<TokenFailure>().await.ok();
            return Err(ClientError::Identity(format!(
                "device code request rejected: {}",
                failure
                    .map(|f| f.error_description.unwrap_or(f.error))
                    .unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Identity(format!("invalid device code response: {e}")))
    }

    async fn poll(&self, authorization: &DeviceAuthorization) -> Result<String, ClientError> {
        let mut interval =
            Duration::from_secs(authorization.interval.unwrap_or(DEFAULT_INTERVAL_SECS));

        loop {
            tokio::time::sleep(interval).await;

            let response = self
                .http
                .post(&self.token_url)
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("client_id", self.client_id.as_str()),
                    ("device_code", authorization.device_code.as_str()),
                ])
                .send()
                .await
                .map_err(|e| ClientError::Identity(format!("token poll failed: {e}")))?;

            if response.status().is_success() {
                let token: TokenSuccess = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Identity(format!("invalid token response: {e}")))?;
                return token.id_token.or(token.access_token).ok_or_else(|| {
                    ClientError::Identity("token response carries no token".to_string())
                });
            }

            let failure: TokenFailure = response
                .json()
                .await
                .map_err(|e| ClientError::Identity(format!("invalid error response: {e}")))?;

            match failure.error.as_str() {
                "authorization_pending" => debug!("Waiting for user to complete sign-in"),
                "slow_down" => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval_secs = interval.as_secs(), "Issuer asked to slow down");
                }
                "expired_token" => {
                    return Err(ClientError::Identity("device code expired".to_string()));
                }
                other => {
                    return Err(ClientError::Identity(
                        failure.error_description.unwrap_or_else(|| other.to_string()),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for DeviceCodeFlow {
    fn name(&self) -> &'static str {
        "device-code"
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<String, ClientError> {
        let authorization = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClientError::Cancelled),
            result = self.start() => result?,
        };

        let prompt = authorization.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                authorization.verification_uri, authorization.user_code
            )
        });
        eprintln!("{prompt}");
        info!("Device code flow started; waiting for user sign-in");

        let limit = self
            .timeout
            .min(Duration::from_secs(authorization.expires_in));

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ClientError::Cancelled),
            result = tokio::time::timeout(limit, self.poll(&authorization)) => {
                result.unwrap_or(Err(ClientError::Timeout(limit)))
            }
        }
    }
}

/// Reuses an existing Azure CLI session (`az account get-access-token`).
#[derive(Debug, Clone)]
pub struct AzureCliProvider {
    program: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzAccessToken {
    access_token: Option<String>,
}

impl AzureCliProvider {
    /// Provider invoking `az` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("az")
    }

    /// Provider invoking a specific executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AzureCliProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for AzureCliProvider {
    fn name(&self) -> &'static str {
        "azure-cli"
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<String, ClientError> {
        let mut command = Command::new(&self.program);
        command
            .args(["account", "get-access-token", "--output", "json"])
            .kill_on_drop(true);

        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClientError::Cancelled),
            output = command.output() => output,
        }
        .map_err(|e| ClientError::Identity(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(ClientError::Identity(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let token: AzAccessToken = serde_json::from_slice(&output.stdout)
            .map_err(|e| ClientError::Identity(format!("unexpected az output: {e}")))?;
        token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::Identity("az returned no accessToken".to_string()))
    }
}

/// Tries providers in order; the last provider's failure is returned.
///
/// Cancellation stops the chain immediately.
pub struct ChainedIdentityProvider {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ChainedIdentityProvider {
    /// Chain `providers`, first tried first.
    pub fn new(providers: Vec<Arc<dyn IdentityProvider>>) -> Self {
        Self { providers }
    }

    /// The configured chain: Azure CLI (if enabled), then the device flow.
    pub fn from_config(issuer: &IssuerConfig, client: &ClientConfig) -> Self {
        let mut providers: Vec<Arc<dyn IdentityProvider>> = Vec::new();
        if client.use_azure_cli {
            providers.push(Arc::new(AzureCliProvider::new()));
        }
        providers.push(Arc::new(DeviceCodeFlow::from_config(issuer, client)));
        Self::new(providers)
    }
}

#[async_trait]
impl IdentityProvider for ChainedIdentityProvider {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<String, ClientError> {
        let mut last = ClientError::Identity("no identity provider configured".to_string());
        for provider in &self.providers {
            match provider.acquire(cancel).await {
                Ok(token) => {
                    debug!(provider = provider.name(), "Identity token acquired");
                    return Ok(token);
                }
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Identity provider failed");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn flow(server: &MockServer, timeout: Duration) -> DeviceCodeFlow {
        DeviceCodeFlow::new(
            "client-1",
            &["openid".to_string(), "profile".to_string()],
            format!("{}/oauth2/v2.0/devicecode", server.uri()),
            format!("{}/oauth2/v2.0/token", server.uri()),
            timeout,
        )
    }

    async fn mount_device_code(server: &MockServer, expires_in: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/devicecode"))
            .and(body_string_contains("client_id=client-1"))
            .and(body_string_contains("scope=openid+profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": "dc-1",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://login.test/device",
                "expires_in": expires_in,
                "interval": 0
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn device_flow_returns_id_token_after_pending() {
        // GIVEN: an issuer that reports one pending poll, then success
        let server = MockServer::start().await;
        mount_device_code(&server, 900).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "authorization_pending" })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .and(body_string_contains("device_code=dc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": "the-id-token",
                "access_token": "the-access-token"
            })))
            .mount(&server)
            .await;

        // WHEN: the flow runs
        let token = flow(&server, Duration::from_secs(10))
            .acquire(&CancellationToken::new())
            .await
            .unwrap();

        // THEN: the id token wins over the access token
        assert_eq!(token, "the-id-token");
    }

    #[tokio::test]
    async fn device_flow_falls_back_to_access_token() {
        let server = MockServer::start().await;
        mount_device_code(&server, 900).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access_token": "only-access" })),
            )
            .mount(&server)
            .await;

        let token = flow(&server, Duration::from_secs(10))
            .acquire(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(token, "only-access");
    }

    #[tokio::test]
    async fn expired_device_code_is_an_identity_error() {
        let server = MockServer::start().await;
        mount_device_code(&server, 900).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "expired_token" })),
            )
            .mount(&server)
            .await;

        let err = flow(&server, Duration::from_secs(10))
            .acquire(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn terminal_error_uses_description() {
        let server = MockServer::start().await;
        mount_device_code(&server, 900).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "access_denied",
                "error_description": "User declined"
            })))
            .mount(&server)
            .await;

        let err = flow(&server, Duration::from_secs(10))
            .acquire(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Identity(ref m) if m == "User declined"));
    }

    #[tokio::test]
    async fn flow_is_bounded_by_timeout() {
        // GIVEN: an issuer that never stops saying "pending"
        let server = MockServer::start().await;
        mount_device_code(&server, 900).await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "authorization_pending" })),
            )
            .mount(&server)
            .await;

        // WHEN: the flow runs with a short timeout
        let err = flow(&server, Duration::from_millis(200))
            .acquire(&CancellationToken::new())
            .await
            .unwrap_err();

        // THEN: it gives up with a timeout
        assert!(matches!(err, ClientError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancelled_flow_stops_immediately() {
        let server = MockServer::start().await;
        mount_device_code(&server, 900).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = flow(&server, Duration::from_secs(10))
            .acquire(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }

    struct Fixed(Result<&'static str, &'static str>);

    #[async_trait]
    impl IdentityProvider for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn acquire(&self, _cancel: &CancellationToken) -> Result<String, ClientError> {
            self.0
                .map(str::to_string)
                .map_err(|e| ClientError::Identity(e.to_string()))
        }
    }

    #[tokio::test]
    async fn chain_falls_through_to_next_provider() {
        let chain = ChainedIdentityProvider::new(vec![
            Arc::new(Fixed(Err("az not logged in"))),
            Arc::new(Fixed(Ok("from-second"))),
        ]);
        let token = chain.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(token, "from-second");
    }

    #[tokio::test]
    async fn chain_reports_last_failure() {
        let chain = ChainedIdentityProvider::new(vec![
            Arc::new(Fixed(Err("first"))),
            Arc::new(Fixed(Err("second"))),
        ]);
        let err = chain.acquire(&CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("second"));
    }

    #[tokio::test]
    async fn missing_az_binary_is_identity_error() {
        let provider = AzureCliProvider::with_program("definitely-not-an-installed-az-binary");
        let err = provider.acquire(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Identity(_)));
    }
}

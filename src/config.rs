//! Configuration management
//!
//! Layering, lowest precedence first:
//!
//! 1. compiled defaults (inert: no tenant, no client id, no secret)
//! 2. optional YAML file
//! 3. legacy flat environment names (`ENTRA_TENANT_ID`, `INTERNAL_JWT_SECRET`, ...)
//! 4. `TOKENBRIDGE_` prefixed variables, `__` separating nested keys
//!    (e.g. `TOKENBRIDGE_TOKENS__ACCESS_TTL_SECS=3600`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::{Error, Result};

/// Values that ship in sample configs and must never be used for real.
const PLACEHOLDERS: &[&str] = &[
    "YOUR_TENANT_ID",
    "YOUR_APP_REGISTRATION_CLIENT_ID",
    "CHANGE_ME_INTERNAL_JWT_SECRET",
];

/// HS256 keys shorter than the hash output are accepted, but flagged.
const MIN_SECRET_LEN: usize = 32;

/// Token lifetimes above ten years are treated as misconfiguration.
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Flat environment names understood for compatibility with existing deployments.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("ENTRA_TENANT_ID", "issuer.tenant_id"),
    ("ENTRA_CLIENT_ID", "issuer.client_id"),
    ("ENTRA_AUTHORITY", "issuer.authority"),
    ("INTERNAL_JWT_SECRET", "tokens.signing_secret"),
    ("AUTH_SERVER_URL", "client.auth_server_url"),
    ("LLM_BACKEND_URL", "gateway.upstream_url"),
    ("OPENID_CACHE_TTL_SECONDS", "discovery.cache_ttl_secs"),
];

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Auth service listener
    pub server: ServerConfig,
    /// Gateway listener and downstream backend
    pub gateway: GatewayConfig,
    /// Trusted external issuer
    pub issuer: IssuerConfig,
    /// Internal token signing and lifetimes
    pub tokens: TokenConfig,
    /// Discovery document / key set caching
    pub discovery: DiscoveryConfig,
    /// Client-side token cache
    pub client: ClientConfig,
}

/// Auth service listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL of the downstream model backend
    pub upstream_url: Option<String>,
    /// Timeout for a single forwarded request
    pub upstream_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            upstream_url: None,
            upstream_timeout_secs: 120,
        }
    }
}

impl GatewayConfig {
    /// Upstream request timeout
    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

/// External issuer (identity provider) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Directory tenant
    pub tenant_id: String,
    /// Application (client) id; the required `aud` of issuer tokens
    pub client_id: String,
    /// Authority base URL override
    pub authority: Option<String>,
    /// Scopes requested by the device-code flow
    pub scopes: Vec<String>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            authority: None,
            scopes: vec!["openid".to_string(), "profile".to_string(), "email".to_string()],
        }
    }
}

impl IssuerConfig {
    /// Authority base URL, without trailing slash.
    #[must_use]
    pub fn authority(&self) -> String {
        match self.authority.as_deref() {
            Some(a) if !a.is_empty() => a.trim_end_matches('/').to_string(),
            _ => format!("https://login.microsoftonline.com/{}", self.tenant_id),
        }
    }

    /// The exact `iss` value accepted on issuer tokens.
    #[must_use]
    pub fn expected_issuer(&self) -> String {
        format!("{}/v2.0", self.authority())
    }

    /// OpenID Connect discovery document URL.
    #[must_use]
    pub fn discovery_url(&self) -> String {
        format!("{}/v2.0/.well-known/openid-configuration", self.authority())
    }

    /// Device authorization endpoint (RFC 8628).
    #[must_use]
    pub fn device_code_url(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.authority())
    }

    /// Token endpoint polled during the device flow.
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }
}

/// Internal token configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HS256 signing secret shared by the auth service and the gateway
    pub signing_secret: String,
    /// Access token lifetime
    pub access_ttl_secs: u64,
    /// Refresh token lifetime
    pub refresh_ttl_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            access_ttl_secs: 3 * 3600,
            refresh_ttl_secs: 30 * 24 * 3600,
        }
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("signing_secret", &"<redacted>")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish()
    }
}

/// Discovery/key-set cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long a fetched document is served from cache
    pub cache_ttl_secs: u64,
    /// Timeout for each discovery or key-set fetch
    pub fetch_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            fetch_timeout_secs: 5,
        }
    }
}

impl DiscoveryConfig {
    /// Cache TTL
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Fetch timeout
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Client-side token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the auth service
    pub auth_server_url: String,
    /// Where the token pair is persisted (default `~/.tokenbridge/token.json`)
    pub token_file: Option<PathBuf>,
    /// Refresh this long before the access token expires
    pub refresh_margin_secs: u64,
    /// Lower bound on the refresh loop's sleep
    pub min_refresh_interval_secs: u64,
    /// Upper bound on an interactive identity flow
    pub identity_timeout_secs: u64,
    /// Try `az account get-access-token` before the device-code flow
    pub use_azure_cli: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_server_url: "http://127.0.0.1:8000".to_string(),
            token_file: None,
            refresh_margin_secs: 300,
            min_refresh_interval_secs: 60,
            identity_timeout_secs: 900,
            use_azure_cli: false,
        }
    }
}

impl ClientConfig {
    /// Resolve the token file location.
    pub fn token_file(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.token_file {
            return Ok(path.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".tokenbridge").join("token.json"))
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env is the common case
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "Failed to load .env file");
            }
        }

        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        let legacy_names: Vec<&str> = LEGACY_ENV.iter().map(|(name, _)| *name).collect();
        figment = figment
            .merge(
                Env::raw()
                    .only(&legacy_names)
                    .map(|key| legacy_env_key(key.as_str()).into()),
            )
            .merge(Env::prefixed("TOKENBRIDGE_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check everything the auth service needs before it can issue tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming every unset or placeholder value.
    pub fn validate_auth_server(&self) -> Result<()> {
        let mut missing = Vec::new();
        if is_unset(&self.issuer.tenant_id) && self.issuer.authority.is_none() {
            missing.push("issuer.tenant_id");
        }
        if is_unset(&self.issuer.client_id) {
            missing.push("issuer.client_id");
        }
        if is_unset(&self.tokens.signing_secret) {
            missing.push("tokens.signing_secret");
        }
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "auth service is not configured ({})",
                missing.join(", ")
            )));
        }
        Url::parse(&self.issuer.authority())
            .map_err(|e| Error::Config(format!("invalid issuer authority: {e}")))?;
        self.validate_lifetimes()?;
        self.warn_on_short_secret();
        Ok(())
    }

    /// Check everything the gateway needs before it can accept credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the signing secret is unset.
    pub fn validate_gateway(&self) -> Result<()> {
        if is_unset(&self.tokens.signing_secret) {
            return Err(Error::Config(
                "gateway is not configured (tokens.signing_secret)".to_string(),
            ));
        }
        self.warn_on_short_secret();
        Ok(())
    }

    fn validate_lifetimes(&self) -> Result<()> {
        if self.tokens.access_ttl_secs == 0 || self.tokens.refresh_ttl_secs == 0 {
            return Err(Error::Config("token lifetimes must be non-zero".to_string()));
        }
        if self.tokens.access_ttl_secs > MAX_LIFETIME_SECS
            || self.tokens.refresh_ttl_secs > MAX_LIFETIME_SECS
        {
            return Err(Error::Config(format!(
                "token lifetimes must not exceed {MAX_LIFETIME_SECS} seconds"
            )));
        }
        if self.tokens.refresh_ttl_secs < self.tokens.access_ttl_secs {
            warn!(
                access_ttl = self.tokens.access_ttl_secs,
                refresh_ttl = self.tokens.refresh_ttl_secs,
                "Refresh lifetime is shorter than access lifetime"
            );
        }
        Ok(())
    }

    fn warn_on_short_secret(&self) {
        if self.tokens.signing_secret.len() < MIN_SECRET_LEN {
            warn!(
                min = MIN_SECRET_LEN,
                "Signing secret is shorter than recommended for HS256"
            );
        }
    }
}

/// Treat empty strings and sample placeholders as unset.
fn is_unset(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || PLACEHOLDERS.contains(&v)
}

/// Map a legacy flat environment name to its nested config key.
fn legacy_env_key(name: &str) -> String {
    LEGACY_ENV
        .iter()
        .find(|(legacy, _)| legacy.eq_ignore_ascii_case(name))
        .map_or_else(|| name.to_ascii_lowercase(), |(_, key)| (*key).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        let mut config = Config::default();
        config.issuer.tenant_id = "tenant-1".to_string();
        config.issuer.client_id = "client-1".to_string();
        config.tokens.signing_secret = "s".repeat(48);
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.tokens.access_ttl_secs, 10_800);
        assert_eq!(config.tokens.refresh_ttl_secs, 2_592_000);
        assert_eq!(config.discovery.cache_ttl_secs, 3_600);
        assert_eq!(config.client.refresh_margin_secs, 300);
        assert_eq!(config.client.min_refresh_interval_secs, 60);
    }

    #[test]
    fn defaults_refuse_to_serve() {
        // GIVEN: the inert defaults
        let config = Config::default();

        // THEN: both services refuse to start
        let err = config.validate_auth_server().unwrap_err().to_string();
        assert!(err.contains("issuer.tenant_id"));
        assert!(err.contains("tokens.signing_secret"));
        assert!(config.validate_gateway().is_err());
    }

    #[test]
    fn placeholder_secret_counts_as_unset() {
        let mut config = configured();
        config.tokens.signing_secret = "CHANGE_ME_INTERNAL_JWT_SECRET".to_string();
        assert!(config.validate_auth_server().is_err());
        assert!(config.validate_gateway().is_err());
    }

    #[test]
    fn configured_values_pass() {
        let config = configured();
        assert!(config.validate_auth_server().is_ok());
        assert!(config.validate_gateway().is_ok());
    }

    #[test]
    fn zero_lifetime_is_rejected() {
        let mut config = configured();
        config.tokens.access_ttl_secs = 0;
        assert!(config.validate_auth_server().is_err());
    }

    #[test]
    fn unbounded_lifetime_is_rejected() {
        // GIVEN: a refresh lifetime that would overflow an expiry timestamp
        let mut config = configured();
        config.tokens.refresh_ttl_secs = u64::MAX;

        // WHEN / THEN: validation refuses it
        assert!(matches!(config.validate_auth_server(), Err(Error::Config(_))));

        // AND: ten years is still accepted
        config.tokens.refresh_ttl_secs = MAX_LIFETIME_SECS;
        assert!(config.validate_auth_server().is_ok());
    }

    #[test]
    fn issuer_urls_derive_from_tenant() {
        let config = configured();
        assert_eq!(
            config.issuer.expected_issuer(),
            "https://login.microsoftonline.com/tenant-1/v2.0"
        );
        assert_eq!(
            config.issuer.discovery_url(),
            "https://login.microsoftonline.com/tenant-1/v2.0/.well-known/openid-configuration"
        );
    }

    #[test]
    fn authority_override_wins_and_drops_trailing_slash() {
        let mut config = configured();
        config.issuer.authority = Some("https://idp.example.com/t/".to_string());
        assert_eq!(config.issuer.expected_issuer(), "https://idp.example.com/t/v2.0");
        assert_eq!(
            config.issuer.device_code_url(),
            "https://idp.example.com/t/oauth2/v2.0/devicecode"
        );
    }

    #[test]
    fn legacy_env_names_map_to_nested_keys() {
        assert_eq!(legacy_env_key("ENTRA_TENANT_ID"), "issuer.tenant_id");
        assert_eq!(legacy_env_key("internal_jwt_secret"), "tokens.signing_secret");
        assert_eq!(legacy_env_key("OTHER"), "other");
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", configured().tokens);
        assert!(!rendered.contains("ssss"));
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reads_yaml_file() {
        // GIVEN: a YAML file overriding a few values
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenbridge.yaml");
        std::fs::write(
            &path,
            "issuer:\n  tenant_id: from-file\ntokens:\n  access_ttl_secs: 60\n",
        )
        .unwrap();

        // WHEN: loaded
        let config = Config::load(Some(&path)).unwrap();

        // THEN: file values override defaults, the rest stay default
        assert_eq!(config.issuer.tenant_id, "from-file");
        assert_eq!(config.tokens.access_ttl_secs, 60);
        assert_eq!(config.tokens.refresh_ttl_secs, 2_592_000);
    }
}

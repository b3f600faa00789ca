//! Issuer metadata cache: the OpenID discovery document and the JWKS it points to.
//!
//! # Fetch discipline
//!
//! - Each document is cached for `ttl`, measured on the injected [`Clock`].
//! - A fresh entry is served without I/O.
//! - Misses are fetched under a single async lock and re-checked after the lock
//!   is taken, so concurrent callers on a cold cache produce one fetch each for
//!   discovery and key set.
//! - A failed fetch fails the caller. Stale entries are never served.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::AuthError;
use crate::clock::Clock;

/// Cache key of the discovery document.
pub const DISCOVERY_KEY: &str = "openid-configuration";
/// Cache key of the key set.
pub const KEY_SET_KEY: &str = "jwks";

/// A fetched document and the monotonic time it was fetched at.
#[derive(Debug, Clone)]
pub struct CachedDocument {
    /// Opaque JSON body.
    pub document: Value,
    /// When the body was fetched.
    pub fetched_at: Instant,
}

/// Storage for cached documents.
///
/// Entries are replaced whole; readers see either the old or the new entry.
pub trait DocumentCache: Send + Sync {
    /// Look up an entry.
    fn get(&self, key: &str) -> Option<CachedDocument>;

    /// Insert or replace an entry.
    fn put(&self, key: &str, entry: CachedDocument);
}

/// Process-local [`DocumentCache`].
#[derive(Debug, Default)]
pub struct InMemoryDocumentCache {
    inner: DashMap<String, CachedDocument>,
}

impl InMemoryDocumentCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentCache for InMemoryDocumentCache {
    fn get(&self, key: &str) -> Option<CachedDocument> {
        self.inner.get(key).map(|entry| entry.clone())
    }

    fn put(&self, key: &str, entry: CachedDocument) {
        self.inner.insert(key.to_string(), entry);
    }
}

/// Where documents come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch and parse a JSON document.
    async fn fetch(&self, url: &str) -> Result<Value, AuthError>;
}

/// [`DocumentSource`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpDocumentSource {
    http: reqwest::Client,
}

impl HttpDocumentSource {
    /// Create a source whose requests give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch(&self, url: &str) -> Result<Value, AuthError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::UpstreamFetchFailure(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::UpstreamFetchFailure(format!(
                "{url}: HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::UpstreamFetchFailure(format!("{url}: {e}")))
    }
}

/// TTL cache of the issuer's discovery document and signing keys.
pub struct KeySetCache {
    discovery_url: String,
    ttl: Duration,
    cache: Arc<dyn DocumentCache>,
    source: Arc<dyn DocumentSource>,
    clock: Arc<dyn Clock>,
    fetch_lock: Mutex<()>,
}

impl KeySetCache {
    /// Create a cache for the issuer whose discovery document lives at `discovery_url`.
    pub fn new(
        discovery_url: impl Into<String>,
        ttl: Duration,
        cache: Arc<dyn DocumentCache>,
        source: Arc<dyn DocumentSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            discovery_url: discovery_url.into(),
            ttl,
            cache,
            source,
            clock,
            fetch_lock: Mutex::new(()),
        }
    }

    /// The discovery document, from cache while fresh.
    pub async fn discovery_document(&self) -> Result<Value, AuthError> {
        self.cached_or_fetch(DISCOVERY_KEY, &self.discovery_url).await
    }

    /// The issuer's signing keys, from cache while fresh.
    ///
    /// On a miss the discovery document is consulted for `jwks_uri` first,
    /// which may itself be a fetch.
    pub async fn key_set(&self) -> Result<JwkSet, AuthError> {
        let document = match self.fresh(KEY_SET_KEY) {
            Some(document) => document,
            None => {
                let discovery = self.discovery_document().await?;
                let jwks_uri = discovery
                    .get("jwks_uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AuthError::UpstreamFetchFailure(
                            "discovery document has no jwks_uri".to_string(),
                        )
                    })?
                    .to_string();
                self.cached_or_fetch(KEY_SET_KEY, &jwks_uri).await?
            }
        };

        serde_json::from_value(document)
            .map_err(|e| AuthError::UpstreamFetchFailure(format!("invalid key set: {e}")))
    }

    fn fresh(&self, key: &str) -> Option<Value> {
        let entry = self.cache.get(key)?;
        let age = self.clock.now().saturating_duration_since(entry.fetched_at);
        (age < self.ttl).then_some(entry.document)
    }

    async fn cached_or_fetch(&self, key: &str, url: &str) -> Result<Value, AuthError> {
        if let Some(document) = self.fresh(key) {
            return Ok(document);
        }

        let _guard = self.fetch_lock.lock().await;
        // Another caller may have filled the entry while we waited
        if let Some(document) = self.fresh(key) {
            return Ok(document);
        }

        debug!(key, url, "Fetching issuer metadata");
        let document = self.source.fetch(url).await?;
        self.cache.put(
            key,
            CachedDocument {
                document: document.clone(),
                fetched_at: self.clock.now(),
            },
        );
        Ok(document)
    }
}

impl std::fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetCache")
            .field("discovery_url", &self.discovery_url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

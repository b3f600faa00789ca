//! Client token cache
//!
//! # States
//!
//! | State | On request |
//! |-------|------------|
//! | absent | identity flow, `/auth/verify`, persist |
//! | fresh (`now < expires_at - margin`) | serve from memory, no I/O |
//! | stale | `/auth/refresh`, persist; on failure behave as absent |
//!
//! Only one renewal runs at a time per process. Before renewing, the token
//! file is re-read in case another process already renewed it. The device id
//! is resolved only on the absent path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::AuthApi;
use super::device::{DeviceIdSource, FixedDeviceId};
use super::identity::IdentityProvider;
use super::store::TokenStore;
use super::ClientError;
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::token::TokenPair;

/// What the cache holds right now, without touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No stored pair
    Absent,
    /// Usable without renewal
    Fresh {
        /// Access token expiry (Unix seconds)
        expires_at: u64,
        /// Seconds of validity left
        remaining_secs: u64,
    },
    /// Inside the refresh margin, or expired
    Stale {
        /// Access token expiry (Unix seconds)
        expires_at: u64,
    },
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "no token cached"),
            Self::Fresh {
                expires_at,
                remaining_secs,
            } => write!(
                f,
                "fresh, expires at {} ({remaining_secs}s left)",
                format_unix(*expires_at)
            ),
            Self::Stale { expires_at } => {
                write!(f, "stale, expires at {}", format_unix(*expires_at))
            }
        }
    }
}

fn format_unix(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map_or_else(|| secs.to_string(), |dt| dt.to_rfc3339())
}

/// Keeps a usable access token available.
pub struct ClientTokenCache {
    store: TokenStore,
    api: Arc<dyn AuthApi>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    refresh_margin_secs: u64,
    min_refresh_interval: Duration,
    device_id: Arc<dyn DeviceIdSource>,
    current: RwLock<Option<TokenPair>>,
    renew_lock: Mutex<()>,
}

impl ClientTokenCache {
    /// Create a cache.
    pub fn new(
        store: TokenStore,
        api: Arc<dyn AuthApi>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let defaults = ClientConfig::default();
        Self {
            store,
            api,
            identity,
            clock,
            refresh_margin_secs: defaults.refresh_margin_secs,
            min_refresh_interval: Duration::from_secs(defaults.min_refresh_interval_secs),
            device_id: Arc::new(FixedDeviceId(None)),
            current: RwLock::new(None),
            renew_lock: Mutex::new(()),
        }
    }

    /// Refresh this many seconds before expiry.
    #[must_use]
    pub fn with_refresh_margin(mut self, secs: u64) -> Self {
        self.refresh_margin_secs = secs;
        self
    }

    /// Never let the refresh loop sleep less than this.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Device id sent with identity tokens.
    #[must_use]
    pub fn with_device_id(self, device_id: Option<String>) -> Self {
        self.with_device_id_source(Arc::new(FixedDeviceId(device_id)))
    }

    /// Resolve the device id from `source`, only when re-authenticating.
    #[must_use]
    pub fn with_device_id_source(mut self, source: Arc<dyn DeviceIdSource>) -> Self {
        self.device_id = source;
        self
    }

    /// A usable access token, renewing it if needed.
    ///
    /// # Errors
    ///
    /// Fails only when a full re-authentication is needed and the identity
    /// flow or the exchange fails, or when the token cannot be persisted.
    pub async fn ensure_token(&self, cancel: &CancellationToken) -> Result<String, ClientError> {
        self.ensure_pair(cancel)
            .await
            .map(|pair| pair.access_token)
    }

    /// Like [`ensure_token`](Self::ensure_token), returning the whole pair.
    pub async fn ensure_pair(&self, cancel: &CancellationToken) -> Result<TokenPair, ClientError> {
        if let Some(pair) = self.fresh_in_memory() {
            return Ok(pair);
        }

        let _guard = self.renew_lock.lock().await;

        // Someone else may have renewed while we waited, in this process or another
        let stored = self.store.load();
        if let Some(ref pair) = stored {
            *self.current.write() = Some(pair.clone());
            if self.is_fresh(pair) {
                return Ok(pair.clone());
            }
        }

        match stored {
            Some(pair) => self.refresh_or_reacquire(&pair, cancel).await,
            None => {
                info!("No cached token; starting authentication flow");
                self.reacquire(cancel).await
            }
        }
    }

    /// How long the refresh loop should sleep after obtaining `pair`.
    ///
    /// `max(min_interval, expires_at - now - margin)`
    pub fn next_refresh_delay(&self, pair: &TokenPair) -> Duration {
        let until_refresh = pair
            .expires_at
            .saturating_sub(self.clock.unix_now())
            .saturating_sub(self.refresh_margin_secs);
        Duration::from_secs(until_refresh).max(self.min_refresh_interval)
    }

    /// Keep the token fresh until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the first error [`ensure_pair`](Self::ensure_pair) cannot recover from.
    pub async fn run_refresh_loop(&self, cancel: CancellationToken) -> Result<(), ClientError> {
        info!("Starting token refresh loop");
        loop {
            let pair = match self.ensure_pair(&cancel).await {
                Ok(pair) => pair,
                Err(ClientError::Cancelled) => break,
                Err(e) => return Err(e),
            };

            let delay = self.next_refresh_delay(&pair);
            debug!(sleep_secs = delay.as_secs(), "Sleeping until next refresh");

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        info!("Token refresh loop stopped");
        Ok(())
    }

    /// Current state, from disk, without renewing.
    pub fn status(&self) -> CacheStatus {
        let Some(pair) = self.store.load() else {
            return CacheStatus::Absent;
        };
        let now = self.clock.unix_now();
        if pair.is_fresh(now, self.refresh_margin_secs) {
            CacheStatus::Fresh {
                expires_at: pair.expires_at,
                remaining_secs: pair.remaining_secs(now),
            }
        } else {
            CacheStatus::Stale {
                expires_at: pair.expires_at,
            }
        }
    }

    /// Forget the token, in memory and on disk. Returns `true` if a file was removed.
    pub fn logout(&self) -> bool {
        *self.current.write() = None;
        self.store.delete()
    }

    fn is_fresh(&self, pair: &TokenPair) -> bool {
        pair.is_fresh(self.clock.unix_now(), self.refresh_margin_secs)
    }

    fn fresh_in_memory(&self) -> Option<TokenPair> {
        self.current
            .read()
            .as_ref()
            .filter(|pair| self.is_fresh(pair))
            .cloned()
    }

    async fn refresh_or_reacquire(
        &self,
        pair: &TokenPair,
        cancel: &CancellationToken,
    ) -> Result<TokenPair, ClientError> {
        info!(expires_at = pair.expires_at, "Token expiring soon; refreshing");
        match self.api.refresh(&pair.refresh_token).await {
            Ok(renewed) => {
                self.persist(&renewed)?;
                info!(expires_at = renewed.expires_at, "Token refreshed");
                Ok(renewed)
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed; re-authenticating");
                self.reacquire(cancel).await
            }
        }
    }

    async fn reacquire(&self, cancel: &CancellationToken) -> Result<TokenPair, ClientError> {
        let id_token = self.identity.acquire(cancel).await?;
        let device_id = self.device_id.device_id().await;
        let pair = self.api.verify(&id_token, device_id.as_deref()).await?;
        self.persist(&pair)?;
        info!(provider = self.identity.name(), expires_at = pair.expires_at, "Authenticated");
        Ok(pair)
    }

    fn persist(&self, pair: &TokenPair) -> Result<(), ClientError> {
        self.store.save(pair)?;
        *self.current.write() = Some(pair.clone());
        Ok(())
    }
}

impl fmt::Debug for ClientTokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTokenCache")
            .field("store", &self.store)
            .field("refresh_margin_secs", &self.refresh_margin_secs)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish_non_exhaustive()
    }
}

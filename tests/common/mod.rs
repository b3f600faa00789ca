//! Shared fixtures for integration tests.
//!
//! Issuer tokens are signed with `fixtures/issuer_key.pem`, whose public half
//! is published as `fixtures/jwks.json` under kid `test-key-1`.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};

use tokenbridge::auth::keyset::{DocumentSource, InMemoryDocumentCache, KeySetCache};
use tokenbridge::auth::{
    AuthError, AuthService, ExternalTokenVerifier, InternalTokenIssuer, InternalTokenVerifier,
};
use tokenbridge::clock::{Clock, ManualClock, SystemClock};

pub const KID: &str = "test-key-1";
pub const ISSUER: &str = "https://login.test/tenant-1/v2.0";
pub const AUDIENCE: &str = "client-app";
pub const DISCOVERY_URL: &str = "https://login.test/tenant-1/v2.0/.well-known/openid-configuration";
pub const JWKS_URL: &str = "https://login.test/tenant-1/discovery/v2.0/keys";
pub const SECRET: &[u8] = b"integration-test-signing-secret-0123456789";
pub const ACCESS_TTL: u64 = 10_800;
pub const REFRESH_TTL: u64 = 2_592_000;
pub const DISCOVERY_TTL: Duration = Duration::from_secs(3_600);

pub const ISSUER_KEY: &str = include_str!("../fixtures/issuer_key.pem");
pub const ROGUE_KEY: &str = include_str!("../fixtures/rogue_key.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");

/// Serves the discovery document and key set, counting fetches per document.
#[derive(Default)]
pub struct FixtureSource {
    pub discovery_fetches: AtomicUsize,
    pub jwks_fetches: AtomicUsize,
    pub delay: Duration,
}

impl FixtureSource {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn discovery_count(&self) -> usize {
        self.discovery_fetches.load(Ordering::SeqCst)
    }

    pub fn jwks_count(&self) -> usize {
        self.jwks_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for FixtureSource {
    async fn fetch(&self, url: &str) -> Result<Value, AuthError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match url {
            DISCOVERY_URL => {
                self.discovery_fetches.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "issuer": ISSUER, "jwks_uri": JWKS_URL }))
            }
            JWKS_URL => {
                self.jwks_fetches.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::from_str(JWKS).expect("fixture jwks is valid JSON"))
            }
            other => Err(AuthError::UpstreamFetchFailure(format!("{other}: HTTP 404"))),
        }
    }
}

/// Real wall-clock seconds; issuer token `exp` is checked against it.
pub fn wall_now() -> u64 {
    SystemClock.unix_now()
}

/// Claims of a valid issuer identity token.
pub fn valid_claims() -> Value {
    let now = wall_now();
    json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "iat": now,
        "exp": now + 3_600,
        "oid": "user-oid",
        "sub": "user-sub",
        "name": "Test User",
        "preferred_username": "test@example.com"
    })
}

/// RS256 token signed with `pem`, carrying `kid`.
pub fn sign_rs256(pem: &str, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("fixture key is valid PEM");
    jsonwebtoken::encode(&header, claims, &key).expect("signing succeeds")
}

/// A valid issuer identity token.
pub fn id_token() -> String {
    sign_rs256(ISSUER_KEY, Some(KID), &valid_claims())
}

/// An auth service over fixture documents and a manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub source: Arc<FixtureSource>,
    pub service: AuthService,
}

pub fn harness() -> Harness {
    harness_with_source(FixtureSource::default())
}

pub fn harness_with_source(source: FixtureSource) -> Harness {
    let clock = Arc::new(ManualClock::starting_at(wall_now()));
    let source = Arc::new(source);
    let keys = Arc::new(KeySetCache::new(
        DISCOVERY_URL,
        DISCOVERY_TTL,
        Arc::new(InMemoryDocumentCache::new()),
        source.clone(),
        clock.clone(),
    ));
    let service = AuthService::new(
        ExternalTokenVerifier::new(keys, ISSUER, AUDIENCE),
        InternalTokenIssuer::new(SECRET, ACCESS_TTL, REFRESH_TTL, clock.clone()),
        InternalTokenVerifier::new(SECRET, clock.clone()),
        clock.clone(),
    );
    Harness {
        clock,
        source,
        service,
    }
}

//! Key directory (JWKS) fetching and caching
//!
//! The authority publishes its signing keys as a JWK Set. [`KeyDirectory`]
//! keeps the most recent set as one immutable snapshot:
//!
//! - **Whole-snapshot replacement**: a refresh swaps the entire key map
//!   atomically; readers never see a half-updated set
//! - **TTL-based expiry**: a snapshot older than the TTL triggers a refresh
//! - **No probing amplification**: an unknown `kid` against a fresh snapshot
//!   fails with `KeyNotFound` without touching the network
//! - **Single-flight refresh**: concurrent callers that find the snapshot
//!   expired share one outbound fetch and all observe its outcome
//!
//! Stale keys are only served when explicitly enabled
//! ([`KeyDirectory::with_stale_fallback`]); otherwise an expired snapshot
//! plus a failed refresh is a `RegistryConnection` failure.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth_metrics::record_key_directory_fetch;
use crate::config::{AtkConfig, ConfigError};
use crate::error::{AtkError, Result};

/// One public signing key published by the authority
#[derive(Clone)]
pub struct SigningKeyEntry {
    key_id: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

impl SigningKeyEntry {
    /// Build an entry from one JWK
    ///
    /// The algorithm is the JWK's `alg`; without one it is inferred for
    /// OKP (EdDSA) and P-256/P-384 (ES256/ES384) keys only.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the JWK has no `kid`, no
    /// determinable asymmetric algorithm, or unusable key parameters.
    pub fn from_jwk(jwk: &Jwk) -> std::result::Result<Self, String> {
        let key_id = jwk
            .common
            .key_id
            .clone()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| "missing kid".to_string())?;

        let algorithm = key_algorithm(jwk)
            .ok_or_else(|| format!("key '{key_id}' has no usable signature algorithm"))?;

        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|_| format!("key '{key_id}' has invalid key parameters"))?;

        Ok(Self {
            key_id,
            algorithm,
            decoding_key,
        })
    }

    /// Key identifier (`kid`)
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Algorithm this key verifies
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Verification key material
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

// Key material stays out of logs
impl fmt::Debug for SigningKeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyEntry")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("decoding_key", &"<public key>")
            .finish()
    }
}

fn key_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    if let Some(alg) = &jwk.common.key_algorithm {
        return match alg {
            KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
            KeyAlgorithm::ES256 => Some(Algorithm::ES256),
            KeyAlgorithm::ES384 => Some(Algorithm::ES384),
            KeyAlgorithm::RS256 => Some(Algorithm::RS256),
            KeyAlgorithm::RS384 => Some(Algorithm::RS384),
            KeyAlgorithm::RS512 => Some(Algorithm::RS512),
            KeyAlgorithm::PS256 => Some(Algorithm::PS256),
            KeyAlgorithm::PS384 => Some(Algorithm::PS384),
            KeyAlgorithm::PS512 => Some(Algorithm::PS512),
            // HMAC and key-encryption algorithms never verify Agent Tokens
            _ => None,
        };
    }

    match &jwk.algorithm {
        AlgorithmParameters::OctetKeyPair(_) => Some(Algorithm::EdDSA),
        AlgorithmParameters::EllipticCurve(params) => match params.curve {
            EllipticCurve::P256 => Some(Algorithm::ES256),
            EllipticCurve::P384 => Some(Algorithm::ES384),
            _ => None,
        },
        _ => None,
    }
}

/// Key directory document as served by the authority.
///
/// Keys are kept as raw JSON so one unsupported entry does not reject the
/// whole set.
#[derive(Debug, Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

/// Immutable key map plus the instant it was fetched
#[derive(Debug)]
struct KeySnapshot {
    keys: HashMap<String, Arc<SigningKeyEntry>>,
    fetched_at: Instant,
}

impl KeySnapshot {
    fn from_raw(raw: RawKeySet) -> Self {
        let mut keys = HashMap::with_capacity(raw.keys.len());
        for value in raw.keys {
            let parsed = serde_json::from_value::<Jwk>(value)
                .map_err(|e| format!("unparseable JWK: {e}"))
                .and_then(|jwk| SigningKeyEntry::from_jwk(&jwk));
            match parsed {
                Ok(entry) => {
                    keys.insert(entry.key_id.clone(), Arc::new(entry));
                }
                Err(reason) => warn!(reason = %reason, "Skipping key directory entry"),
            }
        }
        Self {
            keys,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() <= ttl
    }

    fn lookup(&self, key_id: &str) -> Option<Arc<SigningKeyEntry>> {
        self.keys.get(key_id).cloned()
    }
}

/// Outcome of the last refresh attempt, shared with callers that waited on it
#[derive(Debug, Default)]
struct RefreshState {
    last_failure: Option<String>,
}

/// Snapshot to answer a lookup from after a refresh attempt
enum Resolved {
    Fresh(Arc<KeySnapshot>),
    Stale(Arc<KeySnapshot>, String),
}

/// Cached view of one authority's key directory
///
/// # Example
///
/// ```rust,no_run
/// # use aif_auth::jwt::KeyDirectory;
/// # use std::time::Duration;
/// # tokio_test::block_on(async {
/// let directory = KeyDirectory::new(
///     url::Url::parse("https://authority.example/.well-known/jwks.json")?,
///     reqwest::Client::new(),
/// )
/// .with_ttl(Duration::from_secs(3600));
///
/// let key = directory.get_key("key-2025-01").await?;
/// println!("{} verifies {:?}", key.key_id(), key.algorithm());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct KeyDirectory {
    /// Key directory endpoint URL
    jwks_uri: Url,
    /// HTTP client
    http_client: reqwest::Client,
    /// Snapshot TTL
    ttl: Duration,
    /// Deadline for one outbound fetch
    fetch_timeout: Duration,
    /// Serve an expired snapshot when refresh fails
    allow_stale: bool,
    /// Current snapshot, swapped whole
    snapshot: ArcSwapOption<KeySnapshot>,
    /// Single-flight guard; held for the duration of one fetch
    refresh: Mutex<RefreshState>,
    /// Bumped after every completed refresh attempt
    refresh_epoch: AtomicU64,
    /// Outbound fetches issued so far
    fetch_count: AtomicU64,
}

impl fmt::Debug for KeyDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDirectory")
            .field("jwks_uri", &self.jwks_uri.as_str())
            .field("ttl", &self.ttl)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("allow_stale", &self.allow_stale)
            .field("key_count", &self.snapshot.load().as_ref().map(|s| s.keys.len()))
            .field("fetch_count", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

impl KeyDirectory {
    /// Create a key directory with default settings
    ///
    /// # Default Settings
    ///
    /// - Cache TTL: 24 hours
    /// - Fetch timeout: 10 seconds
    /// - Stale fallback: disabled
    pub fn new(jwks_uri: Url, http_client: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            http_client,
            ttl: Duration::from_secs(86_400),
            fetch_timeout: Duration::from_secs(10),
            allow_stale: false,
            snapshot: ArcSwapOption::empty(),
            refresh: Mutex::new(RefreshState::default()),
            refresh_epoch: AtomicU64::new(0),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Create a key directory for the authority named in `config`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuthorityUrl`] if the endpoint URL cannot be derived.
    pub fn from_config(config: &AtkConfig, http_client: reqwest::Client) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(config.key_directory_url()?, http_client)
            .with_ttl(config.cache_ttl())
            .with_fetch_timeout(config.fetch_timeout())
            .with_stale_fallback(config.allow_stale_keys))
    }

    /// Set the snapshot TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the per-fetch deadline
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Serve an expired snapshot for the current lookup when refresh fails
    pub fn with_stale_fallback(mut self, allow: bool) -> Self {
        self.allow_stale = allow;
        self
    }

    /// Resolve a signing key by key id
    ///
    /// Uses the cached snapshot while it is within TTL; otherwise refreshes
    /// it first (one fetch shared by all concurrent callers).
    ///
    /// # Errors
    ///
    /// - [`AtkError::KeyNotFound`] if the key id is absent from a current snapshot
    /// - [`AtkError::RegistryConnection`] if the snapshot had to be refreshed
    ///   and the authority could not be reached (or, with stale fallback,
    ///   the key is not in the last known set either)
    pub async fn get_key(&self, key_id: &str) -> Result<Arc<SigningKeyEntry>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            debug!(key_id = key_id, "Key directory cache hit");
            return snapshot.lookup(key_id).ok_or_else(|| key_not_found(key_id));
        }

        match self.refresh_shared().await? {
            Resolved::Fresh(snapshot) => snapshot.lookup(key_id).ok_or_else(|| key_not_found(key_id)),
            Resolved::Stale(snapshot, reason) => snapshot.lookup(key_id).ok_or_else(|| {
                AtkError::RegistryConnection(format!(
                    "{reason}; key '{key_id}' is not in the last known key set"
                ))
            }),
        }
    }

    /// Force a refresh regardless of snapshot age, returning the new key count
    ///
    /// Useful to warm the cache at startup. Still single-flight with
    /// concurrent lookups.
    ///
    /// # Errors
    ///
    /// Returns [`AtkError::RegistryConnection`] if the fetch fails; the
    /// previous snapshot is kept.
    pub async fn refresh(&self) -> Result<usize> {
        let mut state = self.refresh.lock().await;
        let outcome = self.fetch_and_store(&mut state).await;
        drop(state);

        outcome.map(|snapshot| snapshot.keys.len()).map_err(|reason| {
            error!(jwks_uri = %self.jwks_uri, reason = %reason, "Key directory refresh failed");
            AtkError::RegistryConnection(reason)
        })
    }

    /// Drop the cached snapshot; the next lookup refreshes
    pub fn invalidate(&self) {
        self.snapshot.store(None);
        debug!(jwks_uri = %self.jwks_uri, "Key directory cache cleared");
    }

    /// Age of the current snapshot, if any
    pub fn snapshot_age(&self) -> Option<Duration> {
        self.snapshot.load().as_ref().map(|s| s.fetched_at.elapsed())
    }

    /// Key ids in the current snapshot, sorted
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .snapshot
            .load()
            .as_ref()
            .map(|s| s.keys.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Entries in the current snapshot, sorted by key id
    pub fn entries(&self) -> Vec<Arc<SigningKeyEntry>> {
        let mut entries: Vec<Arc<SigningKeyEntry>> = self
            .snapshot
            .load()
            .as_ref()
            .map(|s| s.keys.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        entries
    }

    /// Number of outbound fetches issued so far
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Get the key directory endpoint URI
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    fn fresh_snapshot(&self) -> Option<Arc<KeySnapshot>> {
        self.snapshot
            .load_full()
            .filter(|snapshot| snapshot.is_fresh(self.ttl))
    }

    /// Refresh, or wait for an in-flight refresh and adopt its outcome.
    async fn refresh_shared(&self) -> Result<Resolved> {
        let observed_epoch = self.refresh_epoch.load(Ordering::Acquire);
        let mut state = self.refresh.lock().await;

        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(Resolved::Fresh(snapshot));
        }

        let adopted = if self.refresh_epoch.load(Ordering::Acquire) == observed_epoch {
            None
        } else {
            // A refresh completed while we were waiting on the guard.
            match (&state.last_failure, self.snapshot.load_full()) {
                (Some(reason), _) => Some(Err(reason.clone())),
                (None, Some(snapshot)) => Some(Ok(snapshot)),
                // Invalidated after a successful refresh
                (None, None) => None,
            }
        };

        let outcome = match adopted {
            Some(outcome) => outcome,
            None => self.fetch_and_store(&mut state).await,
        };
        drop(state);

        match outcome {
            Ok(snapshot) => Ok(Resolved::Fresh(snapshot)),
            Err(reason) => match self.snapshot.load_full() {
                Some(stale) if self.allow_stale => {
                    warn!(
                        jwks_uri = %self.jwks_uri,
                        reason = %reason,
                        age_secs = stale.fetched_at.elapsed().as_secs(),
                        "Key directory refresh failed, using stale snapshot"
                    );
                    Ok(Resolved::Stale(stale, reason))
                }
                _ => {
                    error!(jwks_uri = %self.jwks_uri, reason = %reason, "Key directory unavailable");
                    Err(AtkError::RegistryConnection(reason))
                }
            },
        }
    }

    /// Fetch under the refresh guard, publish on success, record the outcome.
    async fn fetch_and_store(
        &self,
        state: &mut RefreshState,
    ) -> std::result::Result<Arc<KeySnapshot>, String> {
        let outcome = self.fetch().await.map(|snapshot| {
            let snapshot = Arc::new(snapshot);
            self.snapshot.store(Some(Arc::clone(&snapshot)));
            snapshot
        });

        state.last_failure = outcome.as_ref().err().cloned();
        self.refresh_epoch.fetch_add(1, Ordering::Release);
        record_key_directory_fetch(outcome.is_ok());
        outcome
    }

    async fn fetch(&self) -> std::result::Result<KeySnapshot, String> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        info!(jwks_uri = %self.jwks_uri, "Fetching key directory");

        let request = async {
            let response = self
                .http_client
                .get(self.jwks_uri.clone())
                .send()
                .await
                .map_err(|e| {
                    debug!(error = %e, "Key directory request error");
                    "key directory request failed".to_string()
                })?;

            if !response.status().is_success() {
                return Err(format!(
                    "key directory returned status {}",
                    response.status().as_u16()
                ));
            }

            response.json::<RawKeySet>().await.map_err(|e| {
                debug!(error = %e, "Key directory body error");
                "malformed key directory".to_string()
            })
        };

        let raw = tokio::time::timeout(self.fetch_timeout, request)
            .await
            .map_err(|_| "key directory fetch timed out".to_string())??;

        let snapshot = KeySnapshot::from_raw(raw);
        info!(
            jwks_uri = %self.jwks_uri,
            key_count = snapshot.keys.len(),
            "Key directory refreshed"
        );
        Ok(snapshot)
    }
}

fn key_not_found(key_id: &str) -> AtkError {
    warn!(key_id = key_id, "Key id not in key directory");
    AtkError::KeyNotFound(format!("no key with id '{key_id}' in the authority's key directory"))
}

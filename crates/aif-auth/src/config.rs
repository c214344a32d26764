//! Verification Configuration Types
//!
//! [`AtkConfig`] is built once at startup (from flags, environment or a
//! config file; loading is the host's business), validated, and then shared
//! read-only by every pipeline component.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

/// Path of the authority's key directory (JWK Set), relative to the base URL.
pub const KEY_DIRECTORY_PATH: &str = ".well-known/jwks.json";

/// Path of the authority's revocation status endpoint, relative to the base URL.
pub const REVOCATION_STATUS_PATH: &str = "api/v1/revocation/status";

/// Symmetric algorithms are never accepted: the verifier only holds public keys.
pub const FORBIDDEN_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Configuration errors, reported once when the validator is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The authority URL cannot be used as a base for endpoints.
    #[error("Invalid authority URL: {0}")]
    InvalidAuthorityUrl(String),

    /// The authority URL is not HTTPS (plain HTTP is only allowed on loopback).
    #[error("Authority URL must use HTTPS (HTTP only allowed for loopback): {0}")]
    InsecureAuthorityUrl(String),

    /// Expected issuer is empty.
    #[error("Expected issuer must not be empty")]
    EmptyIssuer,

    /// Expected audience set is empty.
    #[error("Expected audience set must not be empty")]
    EmptyAudiences,

    /// Allowed algorithm set is empty.
    #[error("Allowed algorithm set must not be empty")]
    EmptyAlgorithms,

    /// A symmetric algorithm was put in the allow-list.
    #[error("Algorithm {0} is not allowed for token verification")]
    ForbiddenAlgorithm(String),

    /// A TTL or timeout that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),
}

/// Agent Token verification configuration
///
/// Defaults follow the authority's recommendations: EdDSA only, a one-day
/// key cache, revocation checking on, 60 seconds of clock skew and a
/// mandatory `jti`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtkConfig {
    /// Base URL of the authority (key directory and revocation endpoints live under it)
    pub authority_url: Url,
    /// Expected `iss` claim
    pub issuer: String,
    /// Accepted `aud` values; a token must name at least one of them
    pub audiences: BTreeSet<String>,
    /// Signature algorithms a token may declare
    #[serde(default = "default_allowed_algorithms")]
    pub allowed_algorithms: HashSet<Algorithm>,
    /// Key directory cache TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Key directory fetch timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Query the authority for revocation status on every verification
    #[serde(default = "default_true")]
    pub revocation_enabled: bool,
    /// Revocation query timeout in seconds
    #[serde(default = "default_revocation_timeout_secs")]
    pub revocation_timeout_secs: u64,
    /// Tolerated clock difference with the authority, in seconds
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
    /// Reject tokens without a `jti` claim
    ///
    /// Only takes effect with revocation disabled; revocation always needs a `jti`.
    #[serde(default = "default_true")]
    pub require_jti: bool,
    /// Serve keys from an expired snapshot when the authority is unreachable
    ///
    /// Off by default: without it, an expired snapshot plus a failed refresh
    /// is a hard `RegistryConnection` failure.
    #[serde(default)]
    pub allow_stale_keys: bool,
}

fn default_allowed_algorithms() -> HashSet<Algorithm> {
    HashSet::from([Algorithm::EdDSA])
}

fn default_cache_ttl_secs() -> u64 {
    86_400
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_revocation_timeout_secs() -> u64 {
    5
}

fn default_clock_skew_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl AtkConfig {
    /// Create a configuration with default settings for the given authority
    ///
    /// # Example
    ///
    /// ```rust
    /// use aif_auth::AtkConfig;
    /// use url::Url;
    ///
    /// let config = AtkConfig::new(
    ///     Url::parse("https://authority.example").unwrap(),
    ///     "aif://issuer.example",
    ///     ["svc-a"],
    /// );
    /// assert!(config.validate().is_ok());
    /// assert_eq!(config.cache_ttl_secs, 86_400);
    /// ```
    pub fn new<I, A>(authority_url: Url, issuer: impl Into<String>, audiences: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            authority_url,
            issuer: issuer.into(),
            audiences: audiences.into_iter().map(Into::into).collect(),
            allowed_algorithms: default_allowed_algorithms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            revocation_enabled: true,
            revocation_timeout_secs: default_revocation_timeout_secs(),
            clock_skew_secs: default_clock_skew_secs(),
            require_jti: true,
            allow_stale_keys: false,
        }
    }

    /// Replace the allowed algorithm set
    pub fn with_algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.allowed_algorithms = algorithms.into_iter().collect();
        self
    }

    /// Set the key directory cache TTL
    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    /// Set the key directory fetch timeout
    pub fn with_fetch_timeout(mut self, secs: u64) -> Self {
        self.fetch_timeout_secs = secs;
        self
    }

    /// Enable or disable revocation checking
    ///
    /// Disabling is an explicit fail-open choice: revoked tokens are accepted
    /// until they expire.
    pub fn with_revocation(mut self, enabled: bool) -> Self {
        self.revocation_enabled = enabled;
        self
    }

    /// Set the revocation query timeout
    pub fn with_revocation_timeout(mut self, secs: u64) -> Self {
        self.revocation_timeout_secs = secs;
        self
    }

    /// Set the clock skew tolerance
    pub fn with_clock_skew(mut self, secs: u64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    /// Require (or not) the `jti` claim
    pub fn with_require_jti(mut self, required: bool) -> Self {
        self.require_jti = required;
        self
    }

    /// Allow serving an expired key snapshot when refresh fails
    pub fn with_stale_keys(mut self, allowed: bool) -> Self {
        self.allow_stale_keys = allowed;
        self
    }

    /// Key directory cache TTL
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Key directory fetch timeout
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Revocation query timeout
    pub fn revocation_timeout(&self) -> Duration {
        Duration::from_secs(self.revocation_timeout_secs)
    }

    /// Check the configuration invariants
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant: unusable or non-HTTPS authority
    /// URL, empty issuer/audiences/algorithms, a symmetric algorithm, or a
    /// zero TTL/timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_authority_url(&self.authority_url)?;

        if self.issuer.trim().is_empty() {
            return Err(ConfigError::EmptyIssuer);
        }
        if self.audiences.is_empty() {
            return Err(ConfigError::EmptyAudiences);
        }
        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::EmptyAlgorithms);
        }
        if let Some(alg) = FORBIDDEN_ALGORITHMS
            .iter()
            .find(|alg| self.allowed_algorithms.contains(alg))
        {
            return Err(ConfigError::ForbiddenAlgorithm(format!("{alg:?}")));
        }

        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration("cache TTL"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("fetch timeout"));
        }
        if self.revocation_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("revocation timeout"));
        }

        Ok(())
    }

    /// URL of the authority's key directory
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuthorityUrl`] if the joined URL does not parse.
    pub fn key_directory_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.authority_url, KEY_DIRECTORY_PATH)
    }

    /// URL of the authority's revocation status endpoint
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuthorityUrl`] if the joined URL does not parse.
    pub fn revocation_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.authority_url, REVOCATION_STATUS_PATH)
    }
}

/// Check that an authority base URL is usable and served over HTTPS
///
/// Plain `http` is accepted only for loopback hosts.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAuthorityUrl`] for URLs that cannot be a base
/// and [`ConfigError::InsecureAuthorityUrl`] for non-HTTPS remote hosts.
pub fn validate_authority_url(url: &Url) -> Result<(), ConfigError> {
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidAuthorityUrl(url.to_string()));
    }
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(url) => Ok(()),
        _ => Err(ConfigError::InsecureAuthorityUrl(url.to_string())),
    }
}

/// Resolve an endpoint `path` under an authority base URL
///
/// The base is treated as a directory whether or not it ends with `/`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAuthorityUrl`] if the joined URL does not parse.
pub fn endpoint_url(authority_url: &Url, path: &str) -> Result<Url, ConfigError> {
    // Url::join drops the last path segment unless the base ends with '/'.
    let base = authority_url.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{path}"))
        .map_err(|e| ConfigError::InvalidAuthorityUrl(format!("{base}/{path}: {e}")))
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

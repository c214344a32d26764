//! Token validation pipeline
//!
//! [`TokenValidator::verify_atk`] composes the stages in a fixed order:
//!
//! 1. Signature verification (algorithm allow-list, key resolution, signature)
//! 2. Claim validation (expiry, not-before, issuer, audience, required claims)
//! 3. Revocation check (the only per-call network request, so it runs last)
//!
//! The first failing stage ends the call; nothing is retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::auth_metrics::record_verification;
use crate::config::{AtkConfig, ConfigError};
use crate::error::{AtkError, Result};
use crate::jwt::{ClaimsValidator, KeyDirectory, SignatureVerifier, VerifiedToken};
use crate::revocation::RevocationChecker;

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedResult {
    /// Acting agent (`sub`)
    pub agent_id: String,
    /// User the agent acts for, derived from the agent identifier
    pub user_id: String,
    /// Token issuer
    pub issuer: String,
    /// Token audience list
    pub audience: Vec<String>,
    /// Unique token id
    pub jti: Option<String>,
    /// Granted permissions
    pub permissions: Vec<String>,
    /// Declared purpose
    pub purpose: Option<String>,
    /// Authority-asserted trust tags
    pub trust_tags: HashMap<String, Value>,
    /// Expiry (`exp`)
    pub expires_at: DateTime<Utc>,
    /// Issue time (`iat`)
    pub issued_at: DateTime<Utc>,
    /// Not-before (`nbf`), when present
    pub not_before: Option<DateTime<Utc>>,
    /// Complete signed claim set
    pub raw_claims: Map<String, Value>,
    /// Key id that verified the signature
    pub key_id: String,
    /// Signature algorithm
    pub algorithm: Algorithm,
    /// Wall time spent in `verify_atk`
    #[serde(rename = "elapsed_ms", serialize_with = "duration_millis")]
    pub elapsed: Duration,
}

impl ValidatedResult {
    /// Whether the token grants `permission`
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    fn assemble(token: VerifiedToken, agent_id: crate::AgentId, elapsed: Duration) -> Result<Self> {
        let VerifiedToken {
            claims,
            raw_claims,
            key_id,
            algorithm,
        } = token;

        // Presence was checked by the claims validator, range by the verifier.
        let timestamp = |name: &str, secs: Option<i64>| {
            secs.and_then(|s| DateTime::from_timestamp(s, 0))
                .ok_or_else(|| AtkError::MissingRequiredClaim(name.to_string()))
        };
        let expires_at = timestamp("exp", claims.exp)?;
        let issued_at = timestamp("iat", claims.iat)?;
        let not_before = claims.nbf.and_then(|s| DateTime::from_timestamp(s, 0));

        Ok(Self {
            user_id: agent_id.user_id().to_string(),
            agent_id: agent_id.to_string(),
            issuer: claims.iss.unwrap_or_default(),
            audience: claims.aud.map(|a| a.to_vec()).unwrap_or_default(),
            jti: claims.jti,
            permissions: claims.permissions,
            purpose: claims.purpose,
            trust_tags: claims.trust_tags,
            expires_at,
            issued_at,
            not_before,
            raw_claims,
            key_id,
            algorithm,
            elapsed,
        })
    }
}

fn duration_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64() * 1000.0)
}

#[derive(Debug)]
struct Inner {
    config: AtkConfig,
    verifier: SignatureVerifier,
    claims: ClaimsValidator,
    revocation: RevocationChecker,
}

/// Agent Token validator
///
/// Cheap to clone; clones share the key directory cache. Safe to call
/// concurrently from any number of tasks.
///
/// # Example
///
/// ```rust,no_run
/// use aif_auth::{AtkConfig, TokenValidator};
/// use url::Url;
///
/// # tokio_test::block_on(async {
/// let config = AtkConfig::new(
///     Url::parse("https://authority.example")?,
///     "aif://issuer.example",
///     ["svc-a"],
/// );
/// let validator = TokenValidator::new(config)?;
///
/// let result = validator.verify_atk("eyJhbGciOiJFZERTQSIs...").await?;
/// println!("{} acting for {}", result.agent_id, result.user_id);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TokenValidator {
    inner: Arc<Inner>,
}

impl TokenValidator {
    /// Create a validator with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: AtkConfig) -> std::result::Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("aif-auth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Self::with_http_client(config, http_client)
    }

    /// Create a validator sharing an existing HTTP client
    ///
    /// Per-call deadlines come from the configuration, independent of any
    /// timeout set on the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn with_http_client(
        config: AtkConfig,
        http_client: reqwest::Client,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let keys = Arc::new(KeyDirectory::from_config(&config, http_client.clone())?);
        let verifier = SignatureVerifier::new(keys, config.allowed_algorithms.iter().copied());
        let claims = ClaimsValidator::from_config(&config);
        let revocation = RevocationChecker::from_config(&config, http_client)?;

        info!(
            authority = %config.authority_url,
            issuer = %config.issuer,
            revocation_enabled = config.revocation_enabled,
            "Agent Token validator initialized"
        );
        if !config.revocation_enabled {
            warn!("Revocation checking is disabled; revoked tokens are accepted until they expire");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                verifier,
                claims,
                revocation,
            }),
        })
    }

    /// Verify an Agent Token
    ///
    /// # Errors
    ///
    /// Returns the [`AtkError`] of the first failing stage.
    pub async fn verify_atk(&self, token: &str) -> Result<ValidatedResult> {
        let started = Instant::now();
        let outcome = self
            .run_pipeline(token, started)
            .instrument(info_span!("verify_atk"))
            .await;

        let elapsed = started.elapsed();
        match &outcome {
            Ok(result) => {
                record_verification(None, elapsed.as_secs_f64());
                info!(
                    agent_id = %result.agent_id,
                    jti = ?result.jti,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Agent Token verified"
                );
            }
            Err(err) => {
                record_verification(Some(err.code()), elapsed.as_secs_f64());
                warn!(code = err.code(), error = %err, "Agent Token rejected");
            }
        }
        outcome
    }

    async fn run_pipeline(&self, token: &str, started: Instant) -> Result<ValidatedResult> {
        let inner = &self.inner;

        let verified = inner.verifier.verify(token).await?;
        let agent_id = inner.claims.validate(&verified.claims)?;
        debug!(agent_id = %agent_id, "Claims validated");

        let issuer = verified.claims.iss.as_deref().unwrap_or_default();
        let jti = verified.claims.jti.as_deref();
        if inner.revocation.is_revoked(jti, issuer).await? {
            return Err(AtkError::RevokedToken(format!(
                "token '{}' has been revoked by the authority",
                jti.unwrap_or_default()
            )));
        }

        ValidatedResult::assemble(verified, agent_id, started.elapsed())
    }

    /// Configuration this validator was built from
    pub fn config(&self) -> &AtkConfig {
        &self.inner.config
    }

    /// Shared key directory cache
    pub fn key_directory(&self) -> &Arc<KeyDirectory> {
        self.inner.verifier.key_directory()
    }
}

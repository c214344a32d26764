//! Semantic claim validation
//!
//! Runs after signature verification, in a fixed order so the reported
//! error is deterministic when a token violates several rules:
//!
//! 1. `exp` (required; expired once `now >= exp + skew`)
//! 2. `nbf` (optional; not yet valid while `now + skew < nbf`)
//! 3. `iss` (must equal the expected issuer)
//! 4. `aud` (must intersect the expected audience set)
//! 5. `jti` (required unless configured otherwise)
//! 6. `sub` (must be a well-formed agent identifier)
//! 7. `iat` (required)

use std::collections::BTreeSet;

use chrono::Utc;

use super::AgentClaims;
use crate::agent_id::AgentId;
use crate::config::AtkConfig;
use crate::error::{AtkError, Result};

/// Checks time bounds, issuer, audience and required claims
#[derive(Debug, Clone)]
pub struct ClaimsValidator {
    issuer: String,
    audiences: BTreeSet<String>,
    clock_skew_secs: i64,
    require_jti: bool,
}

impl ClaimsValidator {
    /// Create a validator
    pub fn new<I, A>(issuer: impl Into<String>, audiences: I, clock_skew_secs: u64, require_jti: bool) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            issuer: issuer.into(),
            audiences: audiences.into_iter().map(Into::into).collect(),
            clock_skew_secs: i64::try_from(clock_skew_secs).unwrap_or(i64::MAX),
            require_jti,
        }
    }

    /// Create a validator from verification configuration
    ///
    /// Revocation is keyed by `jti`, so it is required whenever revocation
    /// checking is enabled.
    pub fn from_config(config: &AtkConfig) -> Self {
        Self::new(
            config.issuer.clone(),
            config.audiences.iter().cloned(),
            config.clock_skew_secs,
            config.require_jti || config.revocation_enabled,
        )
    }

    /// Validate against the current wall clock
    ///
    /// # Errors
    ///
    /// Returns the first failed check in validation order.
    pub fn validate(&self, claims: &AgentClaims) -> Result<AgentId> {
        self.validate_at(claims, Utc::now().timestamp())
    }

    /// Validate as of `now` (Unix seconds)
    ///
    /// Returns the parsed agent identifier from `sub`.
    ///
    /// # Errors
    ///
    /// Returns the first failed check in validation order.
    pub fn validate_at(&self, claims: &AgentClaims, now: i64) -> Result<AgentId> {
        let skew = self.clock_skew_secs;

        let exp = claims
            .exp
            .ok_or_else(|| AtkError::MissingRequiredClaim("exp".into()))?;
        if now >= exp.saturating_add(skew) {
            return Err(AtkError::TokenExpired(format!(
                "expired at {exp}, now {now} (skew {skew}s)"
            )));
        }

        if let Some(nbf) = claims.nbf
            && now.saturating_add(skew) < nbf
        {
            return Err(AtkError::TokenNotYetValid(format!(
                "valid from {nbf}, now {now} (skew {skew}s)"
            )));
        }

        match claims.iss.as_deref() {
            Some(iss) if iss == self.issuer => {}
            Some(iss) => {
                return Err(AtkError::InvalidIssuer(format!(
                    "expected '{}', got '{iss}'",
                    self.issuer
                )));
            }
            None => return Err(AtkError::InvalidIssuer("token has no iss claim".into())),
        }

        let matched = claims
            .aud
            .as_ref()
            .is_some_and(|aud| aud.iter().any(|a| self.audiences.contains(a)));
        if !matched {
            let got = claims.aud.as_ref().map(|a| a.to_vec()).unwrap_or_default();
            return Err(AtkError::InvalidAudience(format!(
                "token audience {got:?} does not include any of {:?}",
                self.audiences
            )));
        }

        if self.require_jti && claims.jti.as_deref().is_none_or(str::is_empty) {
            return Err(AtkError::MissingRequiredClaim("jti".into()));
        }

        let agent_id = claims
            .sub
            .as_deref()
            .and_then(AgentId::parse)
            .ok_or_else(|| {
                AtkError::MissingRequiredClaim(
                    "sub (aif://<authority>/<model>/<user>/<instance>)".into(),
                )
            })?;

        if claims.iat.is_none() {
            return Err(AtkError::MissingRequiredClaim("iat".into()));
        }

        Ok(agent_id)
    }
}

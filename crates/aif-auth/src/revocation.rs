//! Revocation status checks against the authority
//!
//! Every verification with revocation enabled issues exactly one query;
//! results are never cached. Anything other than a well-formed answer for
//! the requested `jti` is a [`AtkError::RevocationCheck`] failure, never an
//! implicit "not revoked".
//!
//! # Wire format
//!
//! ```text
//! GET <authority>/api/v1/revocation/status?jti=abc-1&iss=aif%3A%2F%2Fissuer.example
//!
//! 200 OK
//! {"jti": "abc-1", "is_revoked": false}
//! ```
//!
//! With revocation disabled no request is made and every token is treated
//! as not revoked. This is an explicit fail-open configuration choice.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, warn};
use url::Url;

use crate::auth_metrics::record_revocation_check;
use crate::config::{AtkConfig, ConfigError};
use crate::error::{AtkError, Result};

/// Authority answer for one `jti`
#[derive(Debug, Clone, Deserialize)]
struct RevocationStatus {
    jti: String,
    is_revoked: bool,
}

/// Queries the authority's revocation status endpoint
#[derive(Clone)]
pub struct RevocationChecker {
    endpoint: Url,
    http_client: reqwest::Client,
    timeout: Duration,
    enabled: bool,
}

impl fmt::Debug for RevocationChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationChecker")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl RevocationChecker {
    /// Create an enabled checker with a 5 second timeout
    pub fn new(endpoint: Url, http_client: reqwest::Client) -> Self {
        Self {
            endpoint,
            http_client,
            timeout: Duration::from_secs(5),
            enabled: true,
        }
    }

    /// Create a checker for the authority named in `config`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuthorityUrl`] if the endpoint URL cannot be derived.
    pub fn from_config(config: &AtkConfig, http_client: reqwest::Client) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(config.revocation_url()?, http_client)
            .with_timeout(config.revocation_timeout())
            .with_enabled(config.revocation_enabled))
    }

    /// Set the query deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable checking
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether queries are issued at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Ask the authority whether the token `jti` issued by `issuer` is revoked
    ///
    /// # Errors
    ///
    /// Returns [`AtkError::MissingRequiredClaim`] when checking is enabled and
    /// the token has no `jti`. Returns [`AtkError::RevocationCheck`] when the
    /// authority is unreachable within the timeout, answers with a non-success
    /// status, or sends a body that does not confirm the status of the
    /// requested `jti`.
    pub async fn is_revoked(&self, jti: Option<&str>, issuer: &str) -> Result<bool> {
        if !self.enabled {
            debug!("Revocation checking disabled, treating token as not revoked");
            return Ok(false);
        }

        // Token defect, never transient.
        let Some(jti) = jti.filter(|jti| !jti.is_empty()) else {
            return Err(AtkError::MissingRequiredClaim("jti".into()));
        };

        match self.query(jti, issuer).await {
            Ok(revoked) => {
                record_revocation_check(if revoked { "revoked" } else { "active" });
                debug!(jti = jti, revoked = revoked, "Revocation status received");
                Ok(revoked)
            }
            Err(reason) => {
                record_revocation_check("error");
                error!(endpoint = %self.endpoint, jti = jti, reason = %reason, "Revocation check failed");
                Err(AtkError::RevocationCheck(reason))
            }
        }
    }

    async fn query(&self, jti: &str, issuer: &str) -> std::result::Result<bool, String> {
        let request = async {
            let response = self
                .http_client
                .get(self.endpoint.clone())
                .query(&[("jti", jti), ("iss", issuer)])
                .send()
                .await
                .map_err(|e| {
                    debug!(error = %e, "Revocation request error");
                    "revocation request failed".to_string()
                })?;

            if !response.status().is_success() {
                return Err(format!(
                    "revocation endpoint returned status {}",
                    response.status().as_u16()
                ));
            }

            response.json::<RevocationStatus>().await.map_err(|e| {
                debug!(error = %e, "Revocation body error");
                "malformed revocation response".to_string()
            })
        };

        let status = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| "revocation check timed out".to_string())??;

        if status.jti != jti {
            warn!(requested = jti, answered = %status.jti, "Revocation response is for a different jti");
            return Err(format!(
                "revocation response is for jti '{}', not '{jti}'",
                status.jti
            ));
        }
        Ok(status.is_revoked)
    }
}

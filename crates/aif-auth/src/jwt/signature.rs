//! Header inspection and signature verification
//!
//! The header is read *untrusted* first so the declared algorithm can be
//! checked against the allow-list before any key is resolved. A token
//! declaring an algorithm outside the allow-list never causes a key
//! directory fetch.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::DateTime;
use jsonwebtoken::{Algorithm, Validation, decode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::jwks::KeyDirectory;
use super::AgentClaims;
use crate::error::{AtkError, Result};

/// Token header fields read before verification
#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// A token whose signature has been verified
///
/// Claims are authentic but not yet semantically validated.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Typed claim set
    pub claims: AgentClaims,
    /// Full claim set as signed, including extension claims
    pub raw_claims: Map<String, Value>,
    /// Key id that verified the signature
    pub key_id: String,
    /// Algorithm that verified the signature
    pub algorithm: Algorithm,
}

/// Verifies token signatures against the authority's key directory
#[derive(Clone)]
pub struct SignatureVerifier {
    keys: Arc<KeyDirectory>,
    allowed_algorithms: HashSet<Algorithm>,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("keys", &self.keys)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .finish()
    }
}

impl SignatureVerifier {
    /// Create a verifier accepting only `allowed_algorithms`
    pub fn new(keys: Arc<KeyDirectory>, allowed_algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        Self {
            keys,
            allowed_algorithms: allowed_algorithms.into_iter().collect(),
        }
    }

    /// Key directory used for key resolution
    pub fn key_directory(&self) -> &Arc<KeyDirectory> {
        &self.keys
    }

    /// Verify the token's signature and decode its claim set
    ///
    /// # Errors
    ///
    /// - [`AtkError::Signature`] for a malformed token, missing `kid`, a key
    ///   whose algorithm differs from the header, a bad signature or a
    ///   claim set that does not decode
    /// - [`AtkError::UnsupportedAlgorithm`] if `alg` is unknown (including
    ///   `none`) or not allowed
    /// - [`AtkError::KeyNotFound`] / [`AtkError::RegistryConnection`] from
    ///   key resolution
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken> {
        let header = peek_header(token)?;

        let algorithm = Algorithm::from_str(&header.alg)
            .map_err(|_| AtkError::UnsupportedAlgorithm(format!("unknown algorithm '{}'", header.alg)))?;
        if !self.allowed_algorithms.contains(&algorithm) {
            warn!(algorithm = ?algorithm, "Token algorithm not in allow-list");
            return Err(AtkError::UnsupportedAlgorithm(format!(
                "algorithm {algorithm:?} is not allowed"
            )));
        }

        let key_id = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AtkError::Signature("token header has no key id".into()))?;

        let entry = self.keys.get_key(&key_id).await?;
        if entry.algorithm() != algorithm {
            warn!(
                key_id = %key_id,
                header_algorithm = ?algorithm,
                key_algorithm = ?entry.algorithm(),
                "Token algorithm does not match key"
            );
            return Err(AtkError::Signature(format!(
                "key '{key_id}' does not verify {algorithm:?}"
            )));
        }

        // Time, issuer and audience checks belong to the claims validator.
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;

        let data = decode::<Map<String, Value>>(token, entry.decoding_key(), &validation)?;
        let raw_claims = data.claims;

        let claims: AgentClaims = serde_json::from_value(Value::Object(raw_claims.clone()))
            .map_err(|_| AtkError::Signature("malformed claim set".into()))?;
        check_timestamps(&claims)?;

        debug!(key_id = %key_id, algorithm = ?algorithm, "Token signature verified");
        Ok(VerifiedToken {
            claims,
            raw_claims,
            key_id,
            algorithm,
        })
    }
}

fn peek_header(token: &str) -> Result<RawHeader> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(AtkError::Signature("token is not a three-part JWS".into()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header.trim_end_matches('='))
        .map_err(|_| AtkError::Signature("token header is not base64url".into()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| AtkError::Signature("token header is not a valid JOSE header".into()))
}

fn check_timestamps(claims: &AgentClaims) -> Result<()> {
    for (name, value) in [("exp", claims.exp), ("nbf", claims.nbf), ("iat", claims.iat)] {
        if let Some(secs) = value
            && DateTime::from_timestamp(secs, 0).is_none()
        {
            return Err(AtkError::Signature(format!("{name} is out of range")));
        }
    }
    Ok(())
}

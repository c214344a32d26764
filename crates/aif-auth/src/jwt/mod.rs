//! JWT Infrastructure - key directory, signature verification and claim checks
//!
//! ```text
//! raw token ──► SignatureVerifier ──► ClaimsValidator ──► (revocation) ──► result
//!                    │
//!                    ▼
//!               KeyDirectory  (JWKS snapshot, TTL, single-flight refresh)
//! ```
//!
//! # Modules
//!
//! - `jwks` - key directory fetching and caching
//! - `signature` - header inspection and signature verification
//! - `claims` - semantic claim validation

pub mod claims;
pub mod jwks;
pub mod signature;

// Re-export commonly used types
pub use claims::ClaimsValidator;
pub use jwks::{KeyDirectory, SigningKeyEntry};
pub use signature::{SignatureVerifier, VerifiedToken};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// `aud` claim: a single string or an array of strings (RFC 7519 §4.1.3)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience
    One(String),
    /// Audience list
    Many(Vec<String>),
}

impl Audience {
    /// Audience values as a list
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(aud) => vec![aud.clone()],
            Self::Many(auds) => auds.clone(),
        }
    }

    /// Iterate over the audience values
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::One(aud) => std::slice::from_ref(aud),
            Self::Many(auds) => auds,
        };
        values.iter().map(String::as_str)
    }
}

/// Agent Token claim set
///
/// Every registered claim is optional at this level so that a missing claim
/// surfaces as the matching validation error rather than a decode failure.
///
/// ```json
/// {
///   "iss": "aif://issuer.example",
///   "sub": "aif://issuer.example/model-x/user-42/instance-7",
///   "aud": ["svc-a"],
///   "exp": 1893456000,
///   "iat": 1893452400,
///   "jti": "abc-1",
///   "permissions": ["read:calendar"],
///   "purpose": "schedule a meeting",
///   "trust_tags": {"verified_user": true}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentClaims {
    /// Issuer (iss)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject (sub) - the structured agent identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience (aud)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Expiration Time (exp) - Unix timestamp
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,

    /// Not Before (nbf) - Unix timestamp
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,

    /// Issued At (iat) - Unix timestamp
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,

    /// JWT ID (jti) - unique token identifier used for revocation lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Permissions granted to the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,

    /// Declared purpose of the delegation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,

    /// Authority-asserted trust tags
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub trust_tags: HashMap<String, serde_json::Value>,
}

/// NumericDate (RFC 7519 §2): seconds since the epoch, possibly fractional
///
/// Fractions are floored to whole seconds.
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(secs) = number.as_i64() {
        return Ok(Some(secs));
    }
    match number.as_f64() {
        Some(secs) if secs.is_finite() && secs >= i64::MIN as f64 && secs < i64::MAX as f64 => {
            Ok(Some(secs.floor() as i64))
        }
        _ => Err(D::Error::custom(format!("NumericDate out of range: {number}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audience_string_or_array() {
        let one: Audience = serde_json::from_value(json!("svc-a")).unwrap();
        assert_eq!(one, Audience::One("svc-a".into()));
        assert_eq!(one.to_vec(), vec!["svc-a".to_string()]);

        let many: Audience = serde_json::from_value(json!(["svc-a", "svc-b"])).unwrap();
        assert_eq!(many.iter().collect::<Vec<_>>(), vec!["svc-a", "svc-b"]);
    }

    #[test]
    fn test_claims_tolerate_missing_fields() {
        let claims: AgentClaims = serde_json::from_value(json!({"iss": "x"})).unwrap();
        assert_eq!(claims.iss.as_deref(), Some("x"));
        assert!(claims.exp.is_none());
        assert!(claims.permissions.is_empty());
    }

    #[test]
    fn test_claims_reject_wrong_types() {
        let result = serde_json::from_value::<AgentClaims>(json!({"exp": "tomorrow"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_claims_fractional_numeric_date() {
        let claims: AgentClaims = serde_json::from_value(json!({
            "exp": 1_893_456_000.75,
            "nbf": 1_893_452_399.5,
            "iat": 1_893_452_400,
        }))
        .unwrap();
        assert_eq!(claims.exp, Some(1_893_456_000));
        assert_eq!(claims.nbf, Some(1_893_452_399));
        assert_eq!(claims.iat, Some(1_893_452_400));

        let claims: AgentClaims = serde_json::from_value(json!({"exp": null})).unwrap();
        assert_eq!(claims.exp, None);

        assert!(serde_json::from_value::<AgentClaims>(json!({"exp": 1e300})).is_err());
        assert!(serde_json::from_value::<AgentClaims>(json!({"iat": u64::MAX})).is_err());
    }

    #[test]
    fn test_claims_agent_extensions() {
        let claims: AgentClaims = serde_json::from_value(json!({
            "permissions": ["read:mail", "send:mail"],
            "purpose": "triage inbox",
            "trust_tags": {"kyc": "level-2"}
        }))
        .unwrap();

        assert_eq!(claims.permissions.len(), 2);
        assert_eq!(claims.purpose.as_deref(), Some("triage inbox"));
        assert_eq!(claims.trust_tags["kyc"], json!("level-2"));
    }
}

//! Verification error taxonomy.
//!
//! Every failure of the pipeline is one of the variants below. Errors from
//! the underlying JWT and HTTP libraries are re-wrapped at the point they
//! occur so that no library type or raw key material crosses the public
//! boundary.

use thiserror::Error;

/// Agent Token verification failure.
///
/// The set is closed: hosts are expected to match exhaustively when they
/// map failures to their own responses (e.g. 401 vs 503).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtkError {
    /// Bad signature, unparseable token, malformed header or claim set.
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// The token's declared algorithm is not in the configured allow-list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The token's key id is absent from the key directory.
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// The authority's key directory could not be fetched.
    #[error("Key directory unavailable: {0}")]
    RegistryConnection(String),

    /// `exp` has passed (after clock-skew tolerance).
    #[error("Token expired: {0}")]
    TokenExpired(String),

    /// `nbf` is still in the future (after clock-skew tolerance).
    #[error("Token not yet valid: {0}")]
    TokenNotYetValid(String),

    /// `iss` is missing or does not match the expected issuer.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// No token audience is in the expected audience set.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// A claim required by configuration or by the token format is absent.
    #[error("Missing required claim: {0}")]
    MissingRequiredClaim(String),

    /// The authority could not confirm revocation status.
    #[error("Revocation check failed: {0}")]
    RevocationCheck(String),

    /// The authority reports the token as revoked.
    #[error("Token revoked: {0}")]
    RevokedToken(String),
}

impl AtkError {
    /// Stable machine-readable code for logs and host error mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Signature(_) => "signature_error",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::KeyNotFound(_) => "key_not_found",
            Self::RegistryConnection(_) => "registry_connection_error",
            Self::TokenExpired(_) => "token_expired",
            Self::TokenNotYetValid(_) => "token_not_yet_valid",
            Self::InvalidIssuer(_) => "invalid_issuer",
            Self::InvalidAudience(_) => "invalid_audience",
            Self::MissingRequiredClaim(_) => "missing_required_claim",
            Self::RevocationCheck(_) => "revocation_check_error",
            Self::RevokedToken(_) => "revoked_token",
        }
    }

    /// Whether the failure came from an unreachable authority rather than
    /// from the token itself.
    ///
    /// The pipeline never retries; this is a hint for the host's own
    /// retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RegistryConnection(_) | Self::RevocationCheck(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AtkError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        // Only the kind is kept; library messages may embed token fragments.
        let reason = match err.kind() {
            ErrorKind::InvalidSignature => "signature does not match",
            ErrorKind::InvalidToken => "malformed token",
            ErrorKind::InvalidAlgorithm => "algorithm does not match key",
            ErrorKind::Base64(_) => "invalid base64 encoding",
            ErrorKind::Json(_) => "invalid JSON in token",
            ErrorKind::Utf8(_) => "invalid UTF-8 in token",
            ErrorKind::InvalidKeyFormat => "unusable verification key",
            _ => "cryptographic verification failed",
        };
        AtkError::Signature(reason.to_string())
    }
}

/// Result type alias for verification operations.
pub type Result<T> = std::result::Result<T, AtkError>;

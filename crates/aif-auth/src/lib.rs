//! # AIF Auth - Agent Token Verification
//!
//! Verification of Agent Tokens (ATKs) issued by an AIF authority, for
//! service providers that accept calls from AI agents acting on behalf of
//! users.
//!
//! ## Key Features
//!
//! - **Key Directory Cache** - JWKS snapshot with TTL and single-flight refresh
//! - **Algorithm Allow-List** - checked before any key is resolved; `none` and
//!   HMAC algorithms are never accepted
//! - **Claim Validation** - expiry, not-before (with clock skew), issuer,
//!   audience and required claims in a fixed order
//! - **Revocation Checks** - one authority query per verification, fail-closed
//!   unless explicitly disabled
//! - **Closed Error Taxonomy** - every failure is an [`AtkError`] variant
//!
//! ## Architecture
//!
//! - [`config`] - Verification configuration and its invariants
//! - [`jwt`] - Key directory, signature verification and claim validation
//! - [`revocation`] - Revocation status queries
//! - [`validator`] - The [`TokenValidator`] pipeline
//! - [`agent_id`] - Structured agent identifiers
//! - [`error`] - Error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aif_auth::{AtkConfig, TokenValidator};
//! use url::Url;
//!
//! # tokio_test::block_on(async {
//! let config = AtkConfig::new(
//!     Url::parse("https://authority.example")?,
//!     "aif://issuer.example",
//!     ["svc-a"],
//! );
//! let validator = TokenValidator::new(config)?;
//!
//! match validator.verify_atk("eyJhbGciOiJFZERTQSIs...").await {
//!     Ok(result) if result.has_permission("read:calendar") => {
//!         println!("agent {} acting for {}", result.agent_id, result.user_id);
//!     }
//!     Ok(_) => println!("permission not granted"),
//!     Err(err) if err.is_transient() => println!("authority unavailable: {err}"),
//!     Err(err) => println!("rejected ({}): {err}", err.code()),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - Counters and histograms via the `metrics` facade

pub mod agent_id;
pub mod auth_metrics;
pub mod config;
pub mod error;
pub mod jwt;
pub mod revocation;
pub mod validator;

#[doc(inline)]
pub use agent_id::AgentId;

#[doc(inline)]
pub use auth_metrics::init_auth_metrics;

#[doc(inline)]
pub use config::{AtkConfig, ConfigError};

#[doc(inline)]
pub use error::{AtkError, Result};

#[doc(inline)]
pub use jwt::{AgentClaims, Audience, ClaimsValidator, KeyDirectory, SignatureVerifier, SigningKeyEntry};

#[doc(inline)]
pub use revocation::RevocationChecker;

#[doc(inline)]
pub use validator::{TokenValidator, ValidatedResult};

// Algorithm appears in the public configuration API
pub use jsonwebtoken::Algorithm;

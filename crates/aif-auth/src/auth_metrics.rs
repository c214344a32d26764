//! Verification metrics for observability
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`).
//!
//! ## Metrics Provided
//!
//! - `aif_auth_verifications_total` - Counter for `verify_atk` outcomes (labels: status, code)
//! - `aif_auth_verification_duration_seconds` - Histogram for whole-pipeline duration
//! - `aif_auth_key_directory_fetches_total` - Counter for outbound key directory fetches (labels: status)
//! - `aif_auth_revocation_checks_total` - Counter for revocation queries (labels: status)

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_histogram, histogram};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Initialize metric descriptions. Call once at startup.
///
/// Idempotent: only the first call registers the descriptions.
#[cfg(feature = "metrics")]
pub fn init_auth_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "aif_auth_verifications_total",
            "Total Agent Token verifications (success and failure by error code)"
        );
        describe_histogram!(
            "aif_auth_verification_duration_seconds",
            "Agent Token verification duration in seconds"
        );
        describe_counter!(
            "aif_auth_key_directory_fetches_total",
            "Outbound key directory fetches"
        );
        describe_counter!(
            "aif_auth_revocation_checks_total",
            "Revocation status queries sent to the authority"
        );
    });
}

/// Record the outcome of one `verify_atk` call
#[cfg(feature = "metrics")]
pub(crate) fn record_verification(error_code: Option<&'static str>, duration_seconds: f64) {
    let status = if error_code.is_none() { "success" } else { "failure" };
    counter!(
        "aif_auth_verifications_total",
        "status" => status,
        "code" => error_code.unwrap_or("ok")
    )
    .increment(1);
    histogram!("aif_auth_verification_duration_seconds").record(duration_seconds);
}

/// Record an outbound key directory fetch
#[cfg(feature = "metrics")]
pub(crate) fn record_key_directory_fetch(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("aif_auth_key_directory_fetches_total", "status" => status).increment(1);
}

/// Record a revocation query (`revoked`, `active` or `error`)
#[cfg(feature = "metrics")]
pub(crate) fn record_revocation_check(status: &'static str) {
    counter!("aif_auth_revocation_checks_total", "status" => status).increment(1);
}

// No-op versions when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_auth_metrics() {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_verification(_error_code: Option<&'static str>, _duration_seconds: f64) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_key_directory_fetch(_success: bool) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_revocation_check(_status: &'static str) {}

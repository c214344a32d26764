//! CLI error types

use aif_auth::{AtkError, ConfigError};
use thiserror::Error;

/// CLI errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid verification settings
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The token was rejected (or could not be checked)
    #[error("Token rejected: {0}")]
    Rejected(#[from] AtkError),

    /// No token on the command line or stdin
    #[error("No token given")]
    MissingToken,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code
    ///
    /// `1` for a rejected token, `2` when the authority could not be
    /// reached, `64` for usage and configuration problems.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Rejected(err) if err.is_transient() => 2,
            Self::Rejected(_) => 1,
            Self::Config(_) | Self::MissingToken => 64,
            Self::Io(_) | Self::Json(_) => 1,
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

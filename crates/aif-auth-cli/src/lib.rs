//! # AIF Verify
//!
//! Command-line Agent Token verification, for operators debugging token
//! rejections and for scripting.
//!
//! ## Usage
//!
//! ```bash
//! # Verify a token; the validated result is printed as JSON
//! aif-verify verify "$TOKEN" \
//!   --authority-url https://authority.example \
//!   --issuer aif://issuer.example --audience svc-a
//!
//! # Same, with settings from the environment and the token on stdin
//! export AIF_AUTHORITY_URL=https://authority.example AIF_ISSUER=aif://issuer.example AIF_AUDIENCE=svc-a
//! echo "Bearer $TOKEN" | aif-verify verify -
//!
//! # List the keys the authority currently publishes
//! aif-verify keys --authority-url https://authority.example
//! ```
//!
//! Exit status is `0` for a valid token, `1` for a rejected one, `2` when
//! the authority could not be reached and `64` for usage errors.

pub mod cli;
pub mod error;

use std::io;
use std::time::Duration;

use aif_auth::config::{KEY_DIRECTORY_PATH, endpoint_url, validate_authority_url};
use aif_auth::{KeyDirectory, TokenValidator};
use clap::Parser;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub use cli::{Cli, Command, KeysArgs, ValidatorArgs, VerifyArgs};
pub use error::{CliError, CliResult};

/// Run the CLI application
///
/// # Errors
///
/// Returns [`CliError`] if the token is rejected or the command fails.
pub async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Command::Verify(args) => verify(args).await,
        Command::Keys(args) => keys(args).await,
    }
}

/// Install a stderr subscriber; `RUST_LOG` wins over `-v`
fn init_tracing(verbose: u8, json_logs: bool) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter);

    // A subscriber may already be installed when embedded; keep it.
    let _ = if json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init()
    };
}

async fn verify(args: VerifyArgs) -> CliResult<()> {
    let raw = if args.token == "-" {
        let mut input = String::new();
        tokio::io::stdin().read_to_string(&mut input).await?;
        input
    } else {
        args.token
    };
    let token = normalize_token(&raw).ok_or(CliError::MissingToken)?;

    let validator = TokenValidator::new(args.settings.to_config())?;
    let result = validator.verify_atk(token).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn keys(args: KeysArgs) -> CliResult<()> {
    let jwks_uri = key_directory_url(&args.authority_url)?;
    debug!(jwks_uri = %jwks_uri, "Listing authority keys");

    let directory = KeyDirectory::new(jwks_uri, http_client()?)
        .with_fetch_timeout(Duration::from_secs(args.fetch_timeout.max(1)));
    directory.refresh().await?;

    let keys: Vec<_> = directory
        .entries()
        .iter()
        .map(|entry| json!({"kid": entry.key_id(), "alg": entry.algorithm()}))
        .collect();
    println!("{}", serde_json::to_string_pretty(&keys)?);
    Ok(())
}

/// Key directory URL under an authority that passes the HTTPS rule
fn key_directory_url(authority_url: &url::Url) -> CliResult<url::Url> {
    validate_authority_url(authority_url)?;
    Ok(endpoint_url(authority_url, KEY_DIRECTORY_PATH)?)
}

fn http_client() -> CliResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("aif-verify/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CliError::Config(aif_auth::ConfigError::HttpClient(e.to_string())))
}

/// Strip whitespace and an optional `Bearer ` scheme
fn normalize_token(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let token = match trimmed.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if trimmed.eq_ignore_ascii_case("bearer") => "",
        _ => trimmed,
    };
    (!token.is_empty()).then_some(token)
}

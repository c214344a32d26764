//! Command-line argument definitions

use std::str::FromStr;

use aif_auth::{Algorithm, AtkConfig};
use clap::{Args, Parser, Subcommand};
use url::Url;

/// aif-verify - Agent Token verification against an AIF authority
#[derive(Parser, Debug)]
#[command(
    name = "aif-verify",
    version,
    about = "Verify Agent Tokens against an AIF authority",
    author
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "AIF_JSON_LOGS", global = true)]
    pub json_logs: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify one token and print the validated result as JSON
    Verify(VerifyArgs),

    /// Fetch the authority's key directory and list usable keys
    Keys(KeysArgs),
}

/// Arguments for `verify`
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Token to verify, optionally prefixed with `Bearer `; `-` reads stdin
    #[arg(value_name = "TOKEN", default_value = "-")]
    pub token: String,

    #[command(flatten)]
    pub settings: ValidatorArgs,
}

/// Arguments for `keys`
#[derive(Args, Debug)]
pub struct KeysArgs {
    /// Authority base URL
    #[arg(long, env = "AIF_AUTHORITY_URL")]
    pub authority_url: Url,

    /// Key directory fetch timeout in seconds
    #[arg(long, env = "AIF_FETCH_TIMEOUT", default_value_t = 10)]
    pub fetch_timeout: u64,
}

/// Verification settings
#[derive(Args, Debug, Clone)]
pub struct ValidatorArgs {
    /// Authority base URL
    #[arg(long, env = "AIF_AUTHORITY_URL")]
    pub authority_url: Url,

    /// Expected issuer
    #[arg(long, env = "AIF_ISSUER")]
    pub issuer: String,

    /// Accepted audience (repeatable or comma-separated)
    #[arg(long = "audience", env = "AIF_AUDIENCE", value_delimiter = ',', required = true)]
    pub audiences: Vec<String>,

    /// Allowed signature algorithm (repeatable or comma-separated)
    #[arg(
        long = "algorithm",
        env = "AIF_ALGORITHMS",
        value_delimiter = ',',
        default_value = "EdDSA",
        value_parser = parse_algorithm
    )]
    pub algorithms: Vec<Algorithm>,

    /// Key directory cache TTL in seconds
    #[arg(long, env = "AIF_CACHE_TTL", default_value_t = 86_400)]
    pub cache_ttl: u64,

    /// Key directory fetch timeout in seconds
    #[arg(long, env = "AIF_FETCH_TIMEOUT", default_value_t = 10)]
    pub fetch_timeout: u64,

    /// Skip revocation checks (revoked tokens are accepted until they expire)
    #[arg(long, env = "AIF_NO_REVOCATION")]
    pub no_revocation: bool,

    /// Revocation query timeout in seconds
    #[arg(long, env = "AIF_REVOCATION_TIMEOUT", default_value_t = 5)]
    pub revocation_timeout: u64,

    /// Clock skew tolerance in seconds
    #[arg(long, env = "AIF_CLOCK_SKEW", default_value_t = 60)]
    pub clock_skew: u64,

    /// Accept tokens without a `jti` claim (only with `--no-revocation`)
    #[arg(long, env = "AIF_ALLOW_MISSING_JTI")]
    pub allow_missing_jti: bool,

    /// Serve expired keys when the authority is unreachable
    #[arg(long, env = "AIF_ALLOW_STALE_KEYS")]
    pub allow_stale_keys: bool,
}

impl ValidatorArgs {
    /// Verification configuration for these settings (not yet validated)
    pub fn to_config(&self) -> AtkConfig {
        AtkConfig::new(
            self.authority_url.clone(),
            self.issuer.clone(),
            self.audiences.iter().cloned(),
        )
        .with_algorithms(self.algorithms.iter().copied())
        .with_cache_ttl(self.cache_ttl)
        .with_fetch_timeout(self.fetch_timeout)
        .with_revocation(!self.no_revocation)
        .with_revocation_timeout(self.revocation_timeout)
        .with_clock_skew(self.clock_skew)
        .with_require_jti(!self.allow_missing_jti)
        .with_stale_keys(self.allow_stale_keys)
    }
}

fn parse_algorithm(value: &str) -> Result<Algorithm, String> {
    Algorithm::from_str(value.trim()).map_err(|_| format!("unknown algorithm '{value}'"))
}

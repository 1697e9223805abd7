use anyhow::{Context, Result, bail};
use clap::{Arg, ArgMatches, Command, builder::PossibleValuesParser};
use secrecy::SecretString;
use std::time::Duration;

use crate::auth::{SessionConfig, TokenCodec};

pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_TOKEN_MODE: &str = "token-mode";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_MAX_AGE_SECONDS: &str = "token-max-age-seconds";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenMode {
    Opaque,
    Signed,
}

pub struct Options {
    pub session_ttl_seconds: u64,
    pub token_mode: TokenMode,
    pub token_secret: Option<SecretString>,
    pub token_max_age_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("token_mode", &self.token_mode)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "***"))
            .field("token_max_age_seconds", &self.token_max_age_seconds)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .finish()
    }
}

impl Options {
    /// Parse session and token arguments.
    ///
    /// # Errors
    /// Returns an error if the signed mode lacks a secret or a duration is zero.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let session_ttl_seconds = matches
            .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
            .copied()
            .context("missing required argument: --session-ttl-seconds")?;
        if session_ttl_seconds == 0 {
            bail!("--{ARG_SESSION_TTL_SECONDS} must be greater than zero");
        }

        let token_mode = match matches.get_one::<String>(ARG_TOKEN_MODE).map(String::as_str) {
            Some("signed") => TokenMode::Signed,
            _ => TokenMode::Opaque,
        };

        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .map(|secret| SecretString::from(secret.clone()));
        if token_mode == TokenMode::Signed && token_secret.is_none() {
            bail!("missing required argument: --{ARG_TOKEN_SECRET} (required for signed tokens)");
        }

        let token_max_age_seconds = matches
            .get_one::<u64>(ARG_TOKEN_MAX_AGE_SECONDS)
            .copied()
            .unwrap_or(604_800);
        let sweep_interval_seconds = matches
            .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
            .copied()
            .unwrap_or(60)
            .max(1);

        Ok(Self {
            session_ttl_seconds,
            token_mode,
            token_secret,
            token_max_age_seconds,
            sweep_interval_seconds,
        })
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let codec = match (&self.token_mode, &self.token_secret) {
            (TokenMode::Signed, Some(secret)) => TokenCodec::signed(secret)
                .with_max_age(Duration::from_secs(self.token_max_age_seconds)),
            _ => TokenCodec::Opaque,
        };
        SessionConfig::new()
            .with_ttl(Duration::from_secs(self.session_ttl_seconds))
            .with_token_codec(codec)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Sliding session TTL in seconds")
                .env("GATEHOUSE_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TOKEN_MODE)
                .long(ARG_TOKEN_MODE)
                .help("Bearer token format handed to clients")
                .env("GATEHOUSE_TOKEN_MODE")
                .default_value("opaque")
                .value_parser(PossibleValuesParser::new(["opaque", "signed"])),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HS256 secret for signed tokens")
                .env("GATEHOUSE_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_MAX_AGE_SECONDS)
                .long(ARG_TOKEN_MAX_AGE_SECONDS)
                .help("Lifetime of a signed token in seconds")
                .env("GATEHOUSE_TOKEN_MAX_AGE_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between expired-key sweeps of the in-memory store")
                .env("GATEHOUSE_SWEEP_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

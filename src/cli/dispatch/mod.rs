//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action to run, resolving every option
//! group into the configuration types the server needs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{
    ARG_DSN, ARG_PORT, ARG_REQUEST_TIMEOUT_SECONDS, ARG_TRUST_PROXY_HEADERS, auth, rate_limit,
};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let request_timeout_seconds = matches
        .get_one::<u64>(ARG_REQUEST_TIMEOUT_SECONDS)
        .copied()
        .unwrap_or(30);
    let trust_proxy_headers = matches.get_flag(ARG_TRUST_PROXY_HEADERS);

    let auth_opts = auth::Options::parse(matches)?;
    let rate_limit_opts = rate_limit::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        request_timeout_seconds,
        trust_proxy_headers,
        sweep_interval_seconds: auth_opts.sweep_interval_seconds,
        session: auth_opts.session_config(),
        rate_limit: rate_limit_opts.config(),
    }))
}

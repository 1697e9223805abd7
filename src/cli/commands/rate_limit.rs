use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

use crate::auth::RateLimitConfig;

pub const ARG_GLOBAL_LIMIT: &str = "global-limit";
pub const ARG_IP_LIMIT: &str = "ip-limit";
pub const ARG_USER_LIMIT: &str = "user-limit";
pub const ARG_RATE_WINDOW_SECONDS: &str = "rate-window-seconds";
pub const ARG_LOCK_DURATION_SECONDS: &str = "lock-duration-seconds";
pub const ARG_LOGIN_LOCK_SECONDS: &str = "login-lock-seconds";
pub const ARG_REGISTER_LIMIT: &str = "register-limit";

#[derive(Debug, Clone)]
pub struct Options {
    pub global_limit: i64,
    pub ip_limit: i64,
    pub user_limit: i64,
    pub window_seconds: u64,
    pub lock_duration_seconds: u64,
    pub login_lock_seconds: u64,
    pub register_limit: i64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let defaults = RateLimitConfig::default();
        let limit = |id: &str, default: i64| matches.get_one::<i64>(id).copied().unwrap_or(default);
        let seconds = |id: &str, default: Duration| {
            matches
                .get_one::<u64>(id)
                .copied()
                .unwrap_or_else(|| default.as_secs())
        };

        Self {
            global_limit: limit(ARG_GLOBAL_LIMIT, defaults.global_limit()),
            ip_limit: limit(ARG_IP_LIMIT, defaults.ip_limit()),
            user_limit: limit(ARG_USER_LIMIT, defaults.user_limit()),
            window_seconds: seconds(ARG_RATE_WINDOW_SECONDS, defaults.user_window()),
            lock_duration_seconds: seconds(ARG_LOCK_DURATION_SECONDS, defaults.lock_duration()),
            login_lock_seconds: seconds(ARG_LOGIN_LOCK_SECONDS, defaults.login_lock_lease()),
            register_limit: limit(ARG_REGISTER_LIMIT, defaults.register_limit()),
        }
    }

    #[must_use]
    pub fn config(&self) -> RateLimitConfig {
        RateLimitConfig::default()
            .with_global_limit(self.global_limit)
            .with_ip_limit(self.ip_limit)
            .with_user_limit(self.user_limit)
            .with_window(Duration::from_secs(self.window_seconds))
            .with_lock_duration(Duration::from_secs(self.lock_duration_seconds))
            .with_login_lock_lease(Duration::from_secs(self.login_lock_seconds))
            .with_register_limit(self.register_limit)
    }
}

fn positive_i64() -> clap::builder::RangedI64ValueParser<i64> {
    clap::value_parser!(i64).range(1..)
}

fn positive_u64() -> clap::builder::RangedU64ValueParser<u64> {
    clap::value_parser!(u64).range(1..)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GLOBAL_LIMIT)
                .long(ARG_GLOBAL_LIMIT)
                .help("Login attempts allowed across all clients per window")
                .env("GATEHOUSE_GLOBAL_LIMIT")
                .default_value("60")
                .value_parser(positive_i64()),
        )
        .arg(
            Arg::new(ARG_IP_LIMIT)
                .long(ARG_IP_LIMIT)
                .help("Login attempts allowed per client IP per window")
                .env("GATEHOUSE_IP_LIMIT")
                .default_value("5")
                .value_parser(positive_i64()),
        )
        .arg(
            Arg::new(ARG_USER_LIMIT)
                .long(ARG_USER_LIMIT)
                .help("Login attempts per email per window, also the lockout threshold")
                .env("GATEHOUSE_USER_LIMIT")
                .default_value("5")
                .value_parser(positive_i64()),
        )
        .arg(
            Arg::new(ARG_RATE_WINDOW_SECONDS)
                .long(ARG_RATE_WINDOW_SECONDS)
                .help("Fixed rate-limit window in seconds")
                .env("GATEHOUSE_RATE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(positive_u64()),
        )
        .arg(
            Arg::new(ARG_LOCK_DURATION_SECONDS)
                .long(ARG_LOCK_DURATION_SECONDS)
                .help("How long an account stays locked after too many failures")
                .env("GATEHOUSE_LOCK_DURATION_SECONDS")
                .default_value("900")
                .value_parser(positive_u64()),
        )
        .arg(
            Arg::new(ARG_LOGIN_LOCK_SECONDS)
                .long(ARG_LOGIN_LOCK_SECONDS)
                .help("Lease of the per-email concurrent login lock")
                .env("GATEHOUSE_LOGIN_LOCK_SECONDS")
                .default_value("30")
                .value_parser(positive_u64()),
        )
        .arg(
            Arg::new(ARG_REGISTER_LIMIT)
                .long(ARG_REGISTER_LIMIT)
                .help("Registration attempts allowed per email per window")
                .env("GATEHOUSE_REGISTER_LIMIT")
                .default_value("3")
                .value_parser(positive_i64()),
        )
}

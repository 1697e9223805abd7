//! # Gatehouse (login gateway)
//!
//! `gatehouse` issues and tracks login sessions for an account system. It sits in
//! front of a user repository and a shared key-value store and decides who may
//! log in, how often, and for how long a session stays valid.
//!
//! ## Sessions
//!
//! A session is keyed by a 256-bit random token and listed in a per-user index
//! so that every device of a user can be enumerated or revoked at once. Each
//! validated request slides the session expiry forward. Clients hold either the
//! token itself or a signed JWT wrapping it, depending on the token mode.
//!
//! ## Abuse protection
//!
//! - **Fixed-window rate limits:** global, per client IP, and per email.
//! - **Lockout:** too many failed logins lock the account for a fixed duration;
//!   further failures while locked never extend it.
//! - **Concurrent-login lock:** at most one login attempt per email is in flight.
//!
//! Credential failures never reveal whether an email is registered.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }
}

//! Route handlers and the helpers they share.

pub mod auth;
pub mod health;
pub mod me;
pub mod types;
pub mod utils;

use regex::Regex;

/// Lightweight email sanity check applied before any store or database work.
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

//! Password hashing.
//!
//! Hashes use Argon2id with default parameters and a random salt, stored in PHC
//! string format so parameters and salt travel with the hash.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};

/// Password hashing capability consumed by the auth service.
///
/// Implementations are CPU bound; callers run them on the blocking pool.
pub trait Hasher: Send + Sync {
    /// # Errors
    /// Returns an error if the hash cannot be computed.
    fn hash(&self, plain: &str) -> Result<String>;

    /// `false` for a mismatch and for a stored hash that cannot be parsed.
    fn verify(&self, plain: &str, hash: &str) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Argon2Hasher;

impl Hasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(hash.to_string())
    }

    fn verify(&self, plain: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }
}

//! Error taxonomy for the authentication core.

use super::kv::StoreError;

/// Outcome of a failed auth operation. Callers match on the variant; nothing
/// here is retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("user account is not activated")]
    UserNotActivated,
    #[error("user account is disabled")]
    UserDisabled,
    #[error("user is already logged in")]
    AlreadyLoggedIn,
    #[error("too many requests, please try again later")]
    RateLimitExceeded,
    #[error("another login for this account is in progress")]
    ConcurrentLogin,
    #[error("account temporarily locked after too many failed logins")]
    UserLocked,
    #[error("invalid token")]
    InvalidToken,
    #[error("session not found or expired")]
    SessionExpired,
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Internal(anyhow::Error::new(err))
    }
}

impl AuthError {
    /// Refusals issued by the rate limiter.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded | Self::ConcurrentLogin | Self::UserLocked
        )
    }
}

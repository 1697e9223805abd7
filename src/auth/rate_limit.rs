//! Login and registration throttling backed by the shared store.
//!
//! Flow Overview:
//! 1) Refuse identities under lockout, then take the per-identity login lock.
//! 2) Compare the global, per-IP and per-user fixed-window counters with their limits.
//! 3) After the attempt, bump the counters. Failures feed the lockout counter and
//!    a success clears it.
//!
//! Scaling: every counter, flag and lock lives in the shared store, so limits
//! hold across service instances.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    counter::CounterStore,
    error::AuthError,
    kv::{SharedStore, StoreError},
};

const DEFAULT_GLOBAL_LIMIT: i64 = 60;
const DEFAULT_IP_LIMIT: i64 = 5;
const DEFAULT_USER_LIMIT: i64 = 5;
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(15 * 60);
const DEFAULT_LOGIN_LOCK_LEASE: Duration = Duration::from_secs(30);
const DEFAULT_REGISTER_LIMIT: i64 = 3;

const GLOBAL_SCOPE: &str = "login:global";

fn ip_scope(ip: &str) -> String {
    format!("login:ip:{ip}")
}

fn user_scope(email: &str) -> String {
    format!("login:user:{email}")
}

fn failed_scope(email: &str) -> String {
    format!("login:failed:{email}")
}

fn locked_key(email: &str) -> String {
    format!("login:locked:{email}")
}

fn login_lock_key(email: &str) -> String {
    format!("login:lock:{email}")
}

fn register_scope(email: &str) -> String {
    format!("register:email:{email}")
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    global_limit: i64,
    global_window: Duration,
    ip_limit: i64,
    ip_window: Duration,
    user_limit: i64,
    user_window: Duration,
    lock_duration: Duration,
    login_lock_lease: Duration,
    register_limit: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_limit: DEFAULT_GLOBAL_LIMIT,
            global_window: DEFAULT_WINDOW,
            ip_limit: DEFAULT_IP_LIMIT,
            ip_window: DEFAULT_WINDOW,
            user_limit: DEFAULT_USER_LIMIT,
            user_window: DEFAULT_WINDOW,
            lock_duration: DEFAULT_LOCK_DURATION,
            login_lock_lease: DEFAULT_LOGIN_LOCK_LEASE,
            register_limit: DEFAULT_REGISTER_LIMIT,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_global_limit(mut self, limit: i64) -> Self {
        self.global_limit = limit;
        self
    }

    #[must_use]
    pub fn with_ip_limit(mut self, limit: i64) -> Self {
        self.ip_limit = limit;
        self
    }

    #[must_use]
    pub fn with_user_limit(mut self, limit: i64) -> Self {
        self.user_limit = limit;
        self
    }

    /// Use the same window length for the global, IP and user counters.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.global_window = window;
        self.ip_window = window;
        self.user_window = window;
        self
    }

    #[must_use]
    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    /// Upper bound on how long an unreleased login lock can block an identity.
    #[must_use]
    pub fn with_login_lock_lease(mut self, lease: Duration) -> Self {
        self.login_lock_lease = lease;
        self
    }

    #[must_use]
    pub fn with_register_limit(mut self, limit: i64) -> Self {
        self.register_limit = limit;
        self
    }

    #[must_use]
    pub fn global_limit(&self) -> i64 {
        self.global_limit
    }

    #[must_use]
    pub fn ip_limit(&self) -> i64 {
        self.ip_limit
    }

    #[must_use]
    pub fn user_limit(&self) -> i64 {
        self.user_limit
    }

    #[must_use]
    pub fn user_window(&self) -> Duration {
        self.user_window
    }

    #[must_use]
    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    #[must_use]
    pub fn login_lock_lease(&self) -> Duration {
        self.login_lock_lease
    }

    #[must_use]
    pub fn register_limit(&self) -> i64 {
        self.register_limit
    }
}

/// Exclusive claim on an identity's login path.
///
/// Call [`LoginLock::release`] once the attempt completes. A guard dropped
/// without being released (the attempt was cancelled) hands the release to the
/// runtime; if no runtime is around, the lease expires on its own.
#[must_use = "the login lock is held until released"]
pub struct LoginLock {
    store: Arc<dyn SharedStore>,
    key: String,
    released: bool,
}

impl std::fmt::Debug for LoginLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginLock")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl LoginLock {
    pub async fn release(mut self) {
        self.released = true;
        release_lock(self.store.as_ref(), &self.key).await;
    }
}

impl Drop for LoginLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            debug!(key, "releasing login lock of a cancelled attempt");
            release_lock(store.as_ref(), &key).await;
        });
    }
}

async fn release_lock(store: &dyn SharedStore, key: &str) {
    if let Err(err) = store.delete(key).await {
        warn!(key, "Failed to release login lock: {err}");
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    counters: CounterStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, config: RateLimitConfig) -> Self {
        Self {
            counters: CounterStore::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Run the login gates in order and hand back the identity's login lock.
    ///
    /// # Errors
    /// `UserLocked`, `ConcurrentLogin` or `RateLimitExceeded` for the first gate
    /// that refuses; `Internal` if the store fails. The lock is never held when
    /// this returns an error.
    pub async fn check_login_attempt(&self, ip: &str, email: &str) -> Result<LoginLock, AuthError> {
        if self.is_locked(email).await? {
            debug!(email, "login refused: identity locked");
            return Err(AuthError::UserLocked);
        }

        let lock = self.acquire_login_lock(email).await?;

        if let Err(err) = self.check_login_limits(ip, email).await {
            lock.release().await;
            return Err(err);
        }

        Ok(lock)
    }

    async fn is_locked(&self, email: &str) -> Result<bool, StoreError> {
        self.store.exists(&locked_key(email)).await
    }

    async fn acquire_login_lock(&self, email: &str) -> Result<LoginLock, AuthError> {
        let key = login_lock_key(email);
        if !self
            .store
            .set_nx(&key, "1", self.config.login_lock_lease)
            .await?
        {
            debug!(email, "login refused: another attempt holds the lock");
            return Err(AuthError::ConcurrentLogin);
        }
        Ok(LoginLock {
            store: Arc::clone(&self.store),
            key,
            released: false,
        })
    }

    async fn check_login_limits(&self, ip: &str, email: &str) -> Result<(), AuthError> {
        self.check_limit(GLOBAL_SCOPE, self.config.global_limit)
            .await?;
        self.check_limit(&ip_scope(ip), self.config.ip_limit).await?;
        self.check_limit(&user_scope(email), self.config.user_limit)
            .await
    }

    async fn check_limit(&self, scope: &str, limit: i64) -> Result<(), AuthError> {
        let count = self.counters.get(scope).await?;
        if count >= limit {
            debug!(scope, count, limit, "rate limit reached");
            return Err(AuthError::RateLimitExceeded);
        }
        Ok(())
    }

    /// Count a finished login attempt against every login scope.
    ///
    /// # Errors
    /// Returns `StoreError` if any counter update fails; earlier updates stay applied.
    pub async fn record_login_attempt(
        &self,
        ip: &str,
        email: &str,
        success: bool,
    ) -> Result<(), StoreError> {
        self.counters
            .increment(GLOBAL_SCOPE, self.config.global_window)
            .await?;
        self.counters
            .increment(&ip_scope(ip), self.config.ip_window)
            .await?;
        self.counters
            .increment(&user_scope(email), self.config.user_window)
            .await?;

        if success {
            return self.counters.clear(&failed_scope(email)).await;
        }

        let failures = self
            .counters
            .increment(&failed_scope(email), self.config.user_window)
            .await?;
        if failures >= self.config.user_limit
            && self
                .store
                .set_nx(&locked_key(email), "1", self.config.lock_duration)
                .await?
        {
            info!(
                email,
                failures,
                lock_seconds = self.config.lock_duration.as_secs(),
                "identity locked after repeated login failures"
            );
        }
        Ok(())
    }

    /// Login attempts left for `email` in the current user window.
    ///
    /// # Errors
    /// Returns `StoreError` if the counter cannot be read.
    pub async fn remaining_attempts(&self, email: &str) -> Result<i64, StoreError> {
        let used = self.counters.get(&user_scope(email)).await?;
        Ok((self.config.user_limit - used).max(0))
    }

    /// # Errors
    /// `RateLimitExceeded` when the global, IP or per-email registration budget
    /// is spent; `Internal` if the store fails.
    pub async fn check_register_attempt(&self, ip: &str, email: &str) -> Result<(), AuthError> {
        self.check_limit(GLOBAL_SCOPE, self.config.global_limit)
            .await?;
        self.check_limit(&ip_scope(ip), self.config.ip_limit).await?;
        self.check_limit(&register_scope(email), self.config.register_limit)
            .await
    }

    /// # Errors
    /// Returns `StoreError` if any counter update fails.
    pub async fn record_register_attempt(&self, ip: &str, email: &str) -> Result<(), StoreError> {
        self.counters
            .increment(GLOBAL_SCOPE, self.config.global_window)
            .await?;
        self.counters
            .increment(&ip_scope(ip), self.config.ip_window)
            .await?;
        self.counters
            .increment(&register_scope(email), self.config.user_window)
            .await?;
        Ok(())
    }
}

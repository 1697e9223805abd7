//! Fakes shared by the auth unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{
    hasher::Hasher,
    kv::{MemoryStore, SharedStore, StoreError},
    user::{CreateUserOutcome, NewUser, User, UserRepository, UserStatus},
};

/// Wraps a [`MemoryStore`] and fails selected operations on demand.
pub(crate) struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_all: AtomicBool,
    fail_sadd: AtomicBool,
    fail_incr: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_all: AtomicBool::new(false),
            fail_sadd: AtomicBool::new(false),
            fail_incr: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_sadd(&self, fail: bool) {
        self.fail_sadd.store(fail, Ordering::SeqCst);
    }

    /// Fail counter increments only; reads and other writes keep working.
    pub(crate) fn fail_incr(&self, fail: bool) {
        self.fail_incr.store(fail, Ordering::SeqCst);
    }

    fn check_incr(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.fail_incr.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected incr failure".to_string()));
        }
        Ok(())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for FlakyStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.check_incr()?;
        self.inner.incr(key).await
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.check_incr()?;
        self.inner.incr_with_ttl(key, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set_nx(key, value, ttl).await
    }

    async fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set_xx(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check()?;
        if self.fail_sadd.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected sadd failure".to_string()));
        }
        self.inner.sadd(key, member).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.srem(key, members).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.smembers(key).await
    }
}

/// Hashes by prefixing, so tests skip the Argon2 cost.
pub(crate) struct PlainHasher;

impl Hasher for PlainHasher {
    fn hash(&self, plain: &str) -> Result<String> {
        Ok(format!("plain:{plain}"))
    }

    fn verify(&self, plain: &str, hash: &str) -> bool {
        hash.strip_prefix("plain:") == Some(plain)
    }
}

#[derive(Default)]
pub(crate) struct MemoryUserRepository {
    users: DashMap<String, User>,
    next_id: AtomicUsize,
}

impl MemoryUserRepository {
    /// Insert a user whose password hashes with [`PlainHasher`].
    pub(crate) fn seed(&self, email: &str, password: &str, status: UserStatus) -> User {
        let id = format!("user-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let user = User {
            id,
            email: email.to_string(),
            name: email.to_string(),
            password_hash: format!("plain:{password}"),
            status,
            last_ip: None,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id.clone(), user.clone());
        user
    }

    pub(crate) fn set_status(&self, id: &str, status: UserStatus) {
        if let Some(mut user) = self.users.get_mut(id) {
            user.status = status;
        }
    }

    pub(crate) fn remove(&self, id: &str) {
        self.users.remove(id);
    }

    pub(crate) fn last_ip(&self, id: &str) -> Option<String> {
        self.users.get(id).and_then(|user| user.last_ip.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.email == email)
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.get(id).map(|user| user.clone()))
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        Ok(self.users.iter().any(|entry| entry.email == email))
    }

    async fn create(&self, new: NewUser) -> Result<CreateUserOutcome> {
        if self.email_exists(&new.email).await? {
            return Ok(CreateUserOutcome::Conflict);
        }
        let id = format!("user-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let user = User {
            id,
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            status: new.status,
            last_ip: new.ip,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id.clone(), user.clone());
        Ok(CreateUserOutcome::Created(user))
    }

    async fn update_last_ip(&self, id: &str, ip: &str) -> Result<()> {
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| anyhow!("user {id} not found"))?;
        user.last_ip = Some(ip.to_string());
        user.updated_at = Utc::now();
        Ok(())
    }
}

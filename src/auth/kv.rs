//! Shared key-value store primitives.
//!
//! Counters, locks and session records all live behind [`SharedStore`]. The
//! service keeps no mutable state of its own, so every cross-request race is
//! settled by one of the atomic operations below (`incr`, `incr_with_ttl`,
//! `set_nx`, `set_xx`, `expire`, set membership).
//!
//! [`MemoryStore`] is the in-process implementation. Deadlines are measured
//! with [`tokio::time::Instant`], so a paused test runtime can move time
//! forward deterministically.

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("wrong kind of value stored at {0}")]
    WrongType(String),
    #[error("value stored at {0} is not an integer")]
    NotAnInteger(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal primitive set required by the counter and session stores.
///
/// All TTL-bearing writes replace any previous deadline on the key. Reads never
/// observe an entry whose deadline has passed.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically increment the integer at `key` (missing keys count from 0).
    /// The key's deadline, if any, is left untouched.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Like [`SharedStore::incr`], but a key without a deadline (including one
    /// this call creates) gets `ttl` in the same step. An existing deadline is
    /// left untouched.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditional write; `None` clears any deadline.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Write only if the key is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Write only if the key is present. Returns whether the write happened.
    async fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Reset the deadline of a live key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Add a member to the set at `key`. Returns whether it was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove members from the set at `key`; an emptied set is deleted.
    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

#[derive(Clone, Debug)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

#[derive(Clone, Debug)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn text(value: &str, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value: Value::Text(value.to_string()),
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn empty_set() -> Self {
        Self {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process [`SharedStore`] backed by a concurrent hash map.
///
/// Expired entries are dropped lazily when touched and in bulk by
/// [`MemoryStore::purge_expired`], which the background sweeper calls.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry whose deadline has passed and return how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Time left before `key` expires; `None` for missing or persistent keys.
    #[must_use]
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.with_live(key, |slot| slot.expires_at)
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Number of entries physically held, including ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn with_live<T>(&self, key: &str, read: impl FnOnce(&Slot) -> T) -> Option<T> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return None,
            Some(slot) if !slot.is_expired(now) => return Some(read(&slot)),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        None
    }

    fn bump(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Slot::text("0", None, now));
        if slot.is_expired(now) {
            *slot = Slot::text("0", None, now);
        }
        let current = match &slot.value {
            Value::Text(text) => text
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger(key.to_string()))?,
            Value::Set(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let next = current + 1;
        slot.value = Value::Text(next.to_string());
        if let (Some(ttl), None) = (ttl, slot.expires_at) {
            slot.expires_at = Some(now + ttl);
        }
        Ok(next)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.bump(key, None)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.bump(key, Some(ttl))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.with_live(key, |slot| slot.value.clone()) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text)),
            Some(Value::Set(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = Instant::now();
        self.entries
            .insert(key.to_string(), Slot::text(value, ttl, now));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::text(value, Some(ttl), now));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::text(value, Some(ttl), now));
                Ok(true)
            }
        }
    }

    async fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                *slot = Slot::text(value, Some(ttl), now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.with_live(key, |_| ()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                slot.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(Slot::empty_set);
        if slot.is_expired(now) {
            *slot = Slot::empty_set();
        }
        match &mut slot.value {
            Value::Set(members) => Ok(members.insert(member.to_string())),
            Value::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        let now = Instant::now();
        let (removed, emptied) = match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => match &mut slot.value {
                Value::Set(set) => {
                    let removed = members.iter().filter(|member| set.remove(*member)).count();
                    (removed, set.is_empty())
                }
                Value::Text(_) => return Err(StoreError::WrongType(key.to_string())),
            },
            _ => return Ok(0),
        };
        if emptied {
            self.entries
                .remove_if(key, |_, slot| matches!(&slot.value, Value::Set(set) if set.is_empty()));
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.with_live(key, |slot| slot.value.clone()) {
            None => Ok(Vec::new()),
            Some(Value::Set(members)) => Ok(members.into_iter().collect()),
            Some(Value::Text(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

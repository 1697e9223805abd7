//! Fixed-window counters.
//!
//! A window opens on the first increment of a scope and closes when the key's
//! TTL runs out. Later increments never move the deadline, so a burst that
//! straddles two windows can reach twice the nominal rate.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::kv::{SharedStore, StoreError};

#[derive(Clone)]
pub struct CounterStore {
    store: Arc<dyn SharedStore>,
}

impl CounterStore {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Increment `scope` and return the new count. The first increment of a
    /// window sets its deadline in the same store operation.
    ///
    /// # Errors
    /// Returns `StoreError` if the store rejects the write.
    pub async fn increment(&self, scope: &str, window: Duration) -> Result<i64, StoreError> {
        let count = self.store.incr_with_ttl(scope, window).await?;
        if count == 1 {
            debug!(scope, window_seconds = window.as_secs(), "counter window opened");
        }
        Ok(count)
    }

    /// Current count for `scope`; an absent key counts as zero.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unavailable or holds a non-integer.
    pub async fn get(&self, scope: &str) -> Result<i64, StoreError> {
        match self.store.get(scope).await? {
            None => Ok(0),
            Some(value) => value
                .parse()
                .map_err(|_| StoreError::NotAnInteger(scope.to_string())),
        }
    }

    /// # Errors
    /// Returns `StoreError` if the delete fails.
    pub async fn clear(&self, scope: &str) -> Result<(), StoreError> {
        self.store.delete(scope).await?;
        Ok(())
    }
}

//! Session records and the per-user session index.
//!
//! Each live session is stored once under `session:<token>` and listed in
//! `user_sessions:<user_id>`. The two writes are not transactional: the index
//! may briefly hold tokens whose record is gone, which
//! [`SessionStore::prune_stale_for_user`] cleans up.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{kv::SharedStore, token::generate_session_token};

const TOKEN_ATTEMPTS: usize = 3;

pub(crate) fn session_key(token: &str) -> String {
    format!("session:{token}")
}

fn index_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

fn expires_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone, Debug)]
pub struct NewSession {
    pub user_id: String,
    pub ip: String,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl SessionStore {
    /// `ttl` is the lifetime given to new sessions and restored on every refresh.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Persist a new session under a fresh token and index it under its owner.
    ///
    /// # Errors
    /// Returns an error if no unique token could be allocated or a store write
    /// fails. A record whose index write failed is removed again.
    pub async fn create(&self, new: NewSession) -> Result<Session> {
        let now = Utc::now();
        for _ in 0..TOKEN_ATTEMPTS {
            let session = Session {
                token: generate_session_token()?,
                user_id: new.user_id.clone(),
                ip: new.ip.clone(),
                user_agent: new.user_agent.clone(),
                created_at: now,
                expires_at: expires_at(now, self.ttl),
            };
            let key = session_key(&session.token);
            let payload = serde_json::to_string(&session).context("failed to encode session")?;

            if !self
                .store
                .set_nx(&key, &payload, self.ttl)
                .await
                .context("failed to store session")?
            {
                debug!(user_id = %session.user_id, "session token collision, retrying");
                continue;
            }

            if let Err(err) = self.index(&session.user_id, &session.token, self.ttl).await {
                // An unindexed record could never be listed or bulk-revoked.
                if let Err(cleanup) = self.store.delete(&key).await {
                    warn!(user_id = %session.user_id, "Failed to remove unindexed session: {cleanup}");
                }
                return Err(err);
            }

            debug!(user_id = %session.user_id, "session created");
            return Ok(session);
        }

        Err(anyhow!("failed to generate unique session token"))
    }

    async fn index(&self, user_id: &str, token: &str, ttl: Duration) -> Result<()> {
        let key = index_key(user_id);
        self.store
            .sadd(&key, token)
            .await
            .context("failed to index session")?;
        self.store
            .expire(&key, ttl)
            .await
            .context("failed to set session index ttl")?;
        Ok(())
    }

    /// Load a live session. A record found past its `expires_at` is deleted.
    ///
    /// # Errors
    /// Returns an error if the store fails or the record cannot be decoded.
    pub async fn get(&self, token: &str) -> Result<Option<Session>> {
        let Some(payload) = self
            .store
            .get(&session_key(token))
            .await
            .context("failed to load session")?
        else {
            return Ok(None);
        };
        let session: Session =
            serde_json::from_str(&payload).context("failed to decode session record")?;

        if session.is_expired_at(Utc::now()) {
            debug!(user_id = %session.user_id, "session past expiry, removing");
            self.delete(token).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Remove a session. Returns whether a live record was removed.
    ///
    /// # Errors
    /// Returns an error if the record cannot be deleted. Index cleanup failures
    /// are only logged.
    pub async fn delete(&self, token: &str) -> Result<bool> {
        let key = session_key(token);
        let owner = match self.store.get(&key).await {
            Ok(Some(payload)) => serde_json::from_str::<Session>(&payload)
                .ok()
                .map(|session| session.user_id),
            Ok(None) => None,
            Err(err) => {
                warn!("Failed to read session owner before delete: {err}");
                None
            }
        };

        let removed = self
            .store
            .delete(&key)
            .await
            .context("failed to delete session")?;

        if let Some(user_id) = owner {
            if let Err(err) = self
                .store
                .srem(&index_key(&user_id), &[token.to_string()])
                .await
            {
                warn!(%user_id, "Failed to remove session from user index: {err}");
            }
        }
        Ok(removed)
    }

    /// Slide a session's expiry to `now + ttl`. The user index gets the same
    /// TTL, which every session of the user shares.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn refresh(&self, token: &str) -> Result<Option<Session>> {
        let ttl = self.ttl;
        let Some(mut session) = self.get(token).await? else {
            return Ok(None);
        };
        session.expires_at = expires_at(Utc::now(), ttl);
        let payload = serde_json::to_string(&session).context("failed to encode session")?;

        // A record deleted since the read must stay deleted.
        if !self
            .store
            .set_xx(&session_key(token), &payload, ttl)
            .await
            .context("failed to refresh session")?
        {
            return Ok(None);
        }
        self.index(&session.user_id, token, ttl).await?;
        Ok(Some(session))
    }

    /// Tokens indexed under `user_id`. May include tokens whose record is gone.
    ///
    /// # Errors
    /// Returns an error if the index cannot be read.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.store
            .smembers(&index_key(user_id))
            .await
            .context("failed to list user sessions")
    }

    /// Delete every session indexed under `user_id`, then the index itself.
    ///
    /// # Errors
    /// Returns an error on the first failed delete.
    pub async fn delete_all_by_user(&self, user_id: &str) -> Result<usize> {
        let tokens = self.list_by_user(user_id).await?;
        let mut removed = 0;
        for token in &tokens {
            if self
                .store
                .delete(&session_key(token))
                .await
                .context("failed to delete session")?
            {
                removed += 1;
            }
        }
        self.store
            .delete(&index_key(user_id))
            .await
            .context("failed to delete session index")?;
        Ok(removed)
    }

    /// Drop index entries whose session record no longer exists.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn prune_stale_for_user(&self, user_id: &str) -> Result<usize> {
        let mut stale = Vec::new();
        for token in self.list_by_user(user_id).await? {
            if !self
                .store
                .exists(&session_key(&token))
                .await
                .context("failed to check session")?
            {
                stale.push(token);
            }
        }
        if stale.is_empty() {
            return Ok(0);
        }
        self.store
            .srem(&index_key(user_id), &stale)
            .await
            .context("failed to prune session index")
    }
}

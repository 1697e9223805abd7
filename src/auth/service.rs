//! Authentication service: login, registration and the session lifecycle.
//!
//! Flow Overview:
//! 1) Login runs the rate-limit gates, verifies credentials, creates a session and
//!    returns a bearer token. The attempt is recorded whatever the outcome.
//! 2) Every authenticated request goes through `validate`, which slides the
//!    session expiry and schedules pruning of the owner's session index.
//! 3) Refresh rotates the session token; logout and revocation delete sessions.
//!
//! The service holds no mutable state. Sessions and counters live in the shared
//! store; users live behind [`UserRepository`].

use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    background::BackgroundTasks,
    error::AuthError,
    hasher::Hasher,
    kv::SharedStore,
    rate_limit::{RateLimitConfig, RateLimiter},
    session::{NewSession, Session, SessionStore},
    token::TokenCodec,
    user::{CreateUserOutcome, NewUser, User, UserRepository, UserStatus, normalize_email},
};

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct SessionConfig {
    ttl: Duration,
    token_codec: TokenCodec,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            token_codec: TokenCodec::Opaque,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle lifetime of a session; every validated request restarts it.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_token_codec(mut self, codec: TokenCodec) -> Self {
        self.token_codec = codec;
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[derive(Debug)]
pub struct LoginInput {
    pub email: String,
    pub password: SecretString,
    pub ip: String,
    pub user_agent: Option<String>,
    /// Bearer token the client already presented, if any.
    pub existing_token: Option<String>,
}

#[derive(Debug)]
pub struct LoginOutput {
    pub token: String,
    pub user: User,
    pub session: Session,
}

#[derive(Debug)]
pub struct RegisterInput {
    pub email: String,
    pub password: SecretString,
    pub name: Option<String>,
    pub ip: String,
}

pub struct AuthService {
    sessions: SessionStore,
    limiter: RateLimiter,
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn Hasher>,
    codec: TokenCodec,
    tasks: BackgroundTasks,
}

impl AuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn SharedStore>,
        users: Arc<dyn UserRepository>,
        hasher: Arc<dyn Hasher>,
        session_config: SessionConfig,
        rate_limit: RateLimitConfig,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            sessions: SessionStore::new(Arc::clone(&store), session_config.ttl),
            limiter: RateLimiter::new(store, rate_limit),
            users,
            hasher,
            codec: session_config.token_codec,
            tasks,
        }
    }

    #[must_use]
    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Authenticate with email and password and open a new session.
    ///
    /// # Errors
    /// `AlreadyLoggedIn` when `existing_token` names a live session; any rate
    /// limiter refusal; `InvalidCredentials`, `UserDisabled` or
    /// `UserNotActivated` for credential problems; `Internal` on store or
    /// repository failure.
    pub async fn login(&self, input: LoginInput) -> Result<LoginOutput, AuthError> {
        let email = normalize_email(&input.email);

        if let Some(existing) = input.existing_token.as_deref() {
            if self.is_live(existing).await {
                return Err(AuthError::AlreadyLoggedIn);
            }
        }

        let lock = match self.limiter.check_login_attempt(&input.ip, &email).await {
            Ok(lock) => lock,
            Err(err) => {
                self.record_failed_login(&input.ip, &email).await?;
                return Err(err);
            }
        };

        let result = self.authenticate(&email, &input).await;
        lock.release().await;

        match result {
            Ok(output) => {
                self.record_successful_login(&input.ip, &email).await;
                info!(user_id = %output.user.id, ip = %input.ip, "login succeeded");
                self.schedule_last_ip_update(&output.user.id, &input.ip);
                Ok(output)
            }
            Err(err) => {
                self.record_failed_login(&input.ip, &email).await?;
                debug!(ip = %input.ip, "login failed: {err}");
                Err(err)
            }
        }
    }

    async fn is_live(&self, bearer: &str) -> bool {
        let Ok(token) = self.codec.decode(bearer) else {
            return false;
        };
        match self.sessions.get(&token).await {
            Ok(session) => session.is_some(),
            Err(err) => {
                warn!("Failed to check existing session: {err:#}");
                false
            }
        }
    }

    async fn authenticate(&self, email: &str, input: &LoginInput) -> Result<LoginOutput, AuthError> {
        let user = self
            .users
            .find_by_email(email)
            .await
            .context("failed to look up user")?
            .ok_or(AuthError::InvalidCredentials)?;

        if user.status.is_disabled() {
            return Err(AuthError::UserDisabled);
        }
        if !user.status.is_active() {
            return Err(AuthError::UserNotActivated);
        }

        if !self.verify_password(&input.password, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let session = self
            .sessions
            .create(NewSession {
                user_id: user.id.clone(),
                ip: input.ip.clone(),
                user_agent: input.user_agent.clone(),
            })
            .await?;
        let token = self.issue_token(&session).await?;

        Ok(LoginOutput {
            token,
            user,
            session,
        })
    }

    async fn verify_password(&self, password: &SecretString, hash: &str) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.clone();
        let hash = hash.to_string();
        let verified =
            tokio::task::spawn_blocking(move || hasher.verify(password.expose_secret(), &hash))
                .await
                .context("password verification task failed")?;
        Ok(verified)
    }

    async fn issue_token(&self, session: &Session) -> Result<String, AuthError> {
        match self.codec.encode(session) {
            Ok(token) => Ok(token),
            Err(err) => {
                if let Err(cleanup) = self.sessions.delete(&session.token).await {
                    warn!(user_id = %session.user_id, "Failed to remove session without token: {cleanup:#}");
                }
                Err(err.into())
            }
        }
    }

    /// The failed-attempt counter drives lockout, so losing this write is an
    /// error for the caller rather than a log line.
    async fn record_failed_login(&self, ip: &str, email: &str) -> Result<(), AuthError> {
        self.limiter
            .record_login_attempt(ip, email, false)
            .await
            .map_err(|err| {
                error!(ip, "Failed to record failed login attempt: {err}");
                AuthError::from(err)
            })
    }

    /// The session already exists at this point; a lost write only leaves the
    /// failed-attempt counter to run out its window.
    async fn record_successful_login(&self, ip: &str, email: &str) {
        if let Err(err) = self.limiter.record_login_attempt(ip, email, true).await {
            warn!(ip, "Failed to record successful login attempt: {err}");
        }
    }

    fn schedule_last_ip_update(&self, user_id: &str, ip: &str) {
        let users = Arc::clone(&self.users);
        let user_id = user_id.to_string();
        let ip = ip.to_string();
        self.tasks.spawn("update_last_ip", async move {
            users.update_last_ip(&user_id, &ip).await
        });
    }

    /// Create an active account.
    ///
    /// # Errors
    /// `RateLimitExceeded` when the registration budget is spent,
    /// `UserAlreadyExists` for a taken email, `Internal` otherwise.
    pub async fn register(&self, input: RegisterInput) -> Result<User, AuthError> {
        let email = normalize_email(&input.email);

        let gate = self.limiter.check_register_attempt(&input.ip, &email).await;
        self.limiter
            .record_register_attempt(&input.ip, &email)
            .await
            .map_err(|err| {
                error!(ip = %input.ip, "Failed to record registration attempt: {err}");
                AuthError::from(err)
            })?;
        gate?;

        let user = self.create_user(&email, &input).await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    async fn create_user(&self, email: &str, input: &RegisterInput) -> Result<User, AuthError> {
        if self
            .users
            .email_exists(email)
            .await
            .context("failed to check email")?
        {
            return Err(AuthError::UserAlreadyExists);
        }

        let hasher = Arc::clone(&self.hasher);
        let password = input.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hasher.hash(password.expose_secret()))
            .await
            .context("password hashing task failed")??;

        let new_user = NewUser {
            email: email.to_string(),
            name: input
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(email)
                .to_string(),
            password_hash,
            status: UserStatus::Active,
            ip: Some(input.ip.clone()),
        };
        match self.users.create(new_user).await? {
            CreateUserOutcome::Created(user) => Ok(user),
            CreateUserOutcome::Conflict => Err(AuthError::UserAlreadyExists),
        }
    }

    /// Resolve a bearer token to its session and slide the session expiry.
    ///
    /// # Errors
    /// `InvalidToken` for a malformed or forged token, `SessionExpired` when the
    /// session is gone, `Internal` on store failure.
    pub async fn validate(&self, bearer: &str) -> Result<Session, AuthError> {
        let token = self.codec.decode(bearer)?;
        let session = self
            .sessions
            .refresh(&token)
            .await?
            .ok_or(AuthError::SessionExpired)?;
        self.schedule_prune(&session.user_id);
        Ok(session)
    }

    fn schedule_prune(&self, user_id: &str) {
        let sessions = self.sessions.clone();
        let user_id = user_id.to_string();
        self.tasks.spawn("prune_stale_sessions", async move {
            let pruned = sessions.prune_stale_for_user(&user_id).await?;
            if pruned > 0 {
                debug!(%user_id, pruned, "pruned stale session index entries");
            }
            Ok(())
        });
    }

    /// Rotate a session: the old token stops working and a new one is returned.
    ///
    /// # Errors
    /// `InvalidToken`, `SessionExpired` when the session is gone (including when
    /// a concurrent refresh already rotated it), `Internal` on store failure.
    pub async fn refresh(&self, bearer: &str) -> Result<String, AuthError> {
        let token = self.codec.decode(bearer)?;
        let session = self
            .sessions
            .get(&token)
            .await?
            .ok_or(AuthError::SessionExpired)?;

        if !self.sessions.delete(&token).await? {
            return Err(AuthError::SessionExpired);
        }

        let renewed = self
            .sessions
            .create(NewSession {
                user_id: session.user_id,
                ip: session.ip,
                user_agent: session.user_agent,
            })
            .await?;
        debug!(user_id = %renewed.user_id, "session rotated");
        self.issue_token(&renewed).await
    }

    /// End the session behind a bearer token. Unknown sessions are not an error.
    ///
    /// # Errors
    /// `InvalidToken` for a malformed token, `Internal` on store failure.
    pub async fn logout(&self, bearer: &str) -> Result<(), AuthError> {
        let token = self.codec.decode(bearer)?;
        self.revoke(&token).await
    }

    /// Delete a session by its session token. Idempotent.
    ///
    /// # Errors
    /// `Internal` on store failure.
    pub async fn revoke(&self, session_token: &str) -> Result<(), AuthError> {
        if self.sessions.delete(session_token).await? {
            debug!("session revoked");
        }
        Ok(())
    }

    /// Delete every session of `user_id` and return how many were live.
    ///
    /// # Errors
    /// `Internal` on store failure.
    pub async fn revoke_all_for_user(&self, user_id: &str) -> Result<usize, AuthError> {
        let revoked = self.sessions.delete_all_by_user(user_id).await?;
        info!(%user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Live sessions of `user_id`, oldest first. Dangling index entries are
    /// skipped and pruned in the background.
    ///
    /// # Errors
    /// `Internal` on store failure.
    pub async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Session>, AuthError> {
        let tokens = self.sessions.list_by_user(user_id).await?;
        let indexed = tokens.len();
        let mut sessions = Vec::with_capacity(indexed);
        for token in tokens {
            if let Some(session) = self.sessions.get(&token).await? {
                sessions.push(session);
            }
        }
        if sessions.len() < indexed {
            self.schedule_prune(user_id);
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// The user behind a bearer token, together with the validated session.
    ///
    /// # Errors
    /// Everything `validate` returns, plus `SessionExpired` when the user no
    /// longer exists or is no longer active; their sessions are then revoked in
    /// the background.
    pub async fn current_user(&self, bearer: &str) -> Result<(User, Session), AuthError> {
        let session = self.validate(bearer).await?;
        let user = self
            .users
            .find_by_id(&session.user_id)
            .await
            .context("failed to load session user")?;

        match user {
            Some(user) if user.status.is_active() => Ok((user, session)),
            _ => {
                info!(user_id = %session.user_id, "session owner gone or inactive, revoking sessions");
                let sessions = self.sessions.clone();
                let user_id = session.user_id;
                self.tasks.spawn("revoke_orphaned_sessions", async move {
                    sessions.delete_all_by_user(&user_id).await.map(|_| ())
                });
                Err(AuthError::SessionExpired)
            }
        }
    }

    /// Login attempts left for `email` before the user gate refuses.
    ///
    /// # Errors
    /// `Internal` on store failure.
    pub async fn remaining_login_attempts(&self, email: &str) -> Result<i64, AuthError> {
        Ok(self
            .limiter
            .remaining_attempts(&normalize_email(email))
            .await?)
    }
}

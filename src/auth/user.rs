//! User accounts as seen by the login path.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Applying,
    Banned,
    Deleted,
}

impl UserStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Applying => "applying",
            Self::Banned => "banned",
            Self::Deleted => "deleted",
        }
    }

    /// Banned and deleted accounts.
    #[must_use]
    pub const fn is_disabled(self) -> bool {
        matches!(self, Self::Banned | Self::Deleted)
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "applying" => Ok(Self::Applying),
            "banned" => Ok(Self::Banned),
            "deleted" => Ok(Self::Deleted),
            other => Err(anyhow::anyhow!("unknown user status: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub last_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub ip: Option<String>,
}

/// Result of inserting a user; `Conflict` when the email is already taken.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    Conflict,
}

/// Trim and lowercase an email so lookups and rate-limit scopes agree.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Expects a normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    async fn email_exists(&self, email: &str) -> Result<bool>;

    async fn create(&self, user: NewUser) -> Result<CreateUserOutcome>;

    async fn update_last_ip(&self, id: &str, ip: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() -> Result<()> {
        for status in [
            UserStatus::Active,
            UserStatus::Inactive,
            UserStatus::Applying,
            UserStatus::Banned,
            UserStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<UserStatus>()?, status);
        }
        assert!("suspended".parse::<UserStatus>().is_err());
        Ok(())
    }

    #[test]
    fn status_classification() {
        assert!(UserStatus::Banned.is_disabled());
        assert!(UserStatus::Deleted.is_disabled());
        assert!(!UserStatus::Inactive.is_disabled());
        assert!(!UserStatus::Applying.is_active());
        assert!(UserStatus::Active.is_active());
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}

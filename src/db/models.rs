/// Database models for the access control plane
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account status. Deletion is an explicit tag, not a nulled column with an
/// implicit default scope; every read path filters on it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Locked,
    Closed,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Locked => "locked",
            UserStatus::Closed => "closed",
            UserStatus::Deleted => "deleted",
        }
    }
}

/// Subscription status, mutated by billing events and the expiration sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
    Pending,
}

/// Device authorization status, mirrored into the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Inactive,
}

/// User record in the database
///
/// `login_digest` is an Argon2id PHC string of the full login identifier;
/// `login_prefix` is a truncated SHA-256 of the secret portion used for
/// lookup without a table scan. Neither the raw passphrase nor the raw
/// recovery code is ever stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub status: UserStatus,
    pub login_digest: Option<String>,
    pub login_prefix: Option<String>,
    pub recovery_digest: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the account may receive new tokens
    pub fn can_authenticate(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Plan record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub device_limit: i64,
}

/// Subscription record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Subscription {
    /// "Has access" means active AND not yet expired
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_at > now
    }
}

/// Device record with derived network identity
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub public_key: String,
    pub ipv4: String,
    pub ipv6: String,
    pub status: DeviceStatus,
    pub created_at: DateTime<Utc>,
}

/// Refresh token record; only the one-way digest of the opaque value is kept
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: String,
    pub user_id: String,
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub use_count: i64,
    pub client_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

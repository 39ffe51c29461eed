/// Rotating refresh tokens
///
/// The raw token value exists only in the client's possession and in the
/// return value at issuance/rotation; the database keeps a SHA-256 digest.
/// Rotation is a single compare-and-swap UPDATE on the stored digest.
/// SQLite serializes writers, so of two concurrent exchanges of the same
/// value exactly one matches the old digest; the loser sees zero rows and
/// the token reads as already consumed.
use crate::{
    config::ServerConfig,
    db::models::{RefreshToken, User},
    error::VpnResult,
    subscription,
};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Refresh token service
#[derive(Clone)]
pub struct RefreshTokenService {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl RefreshTokenService {
    /// Create a new refresh token service
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Issue a refresh token for the user.
    ///
    /// Same gate as access tokens: active user with a current subscription.
    /// Returns the raw value, which is never stored.
    pub async fn issue(&self, user: &User, client_label: Option<&str>) -> VpnResult<Option<String>> {
        if !user.can_authenticate() {
            return Ok(None);
        }
        if subscription::current_subscription(&self.db, &user.id)
            .await?
            .is_none()
        {
            return Ok(None);
        }

        let raw = generate_raw_token();
        let now = Utc::now();
        let expires_at = now + Duration::days(self.config.auth.refresh_token_ttl_days);

        sqlx::query(
            "INSERT INTO refresh_token
             (id, user_id, token_digest, expires_at, last_used_at, use_count, client_label, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&user.id)
        .bind(digest(&raw))
        .bind(expires_at)
        .bind(now)
        .bind(client_label)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.prune_excess(&user.id).await?;

        Ok(Some(raw))
    }

    /// Exchange a refresh token for a new one.
    ///
    /// Every rejection path (unknown, expired, inactive user, lapsed
    /// subscription, lost race) is indistinguishable: `None`.
    pub async fn exchange(&self, raw: &str) -> VpnResult<Option<(User, String)>> {
        let old_digest = digest(raw);
        let now = Utc::now();

        // Every statement here runs in autocommit mode. A read-then-write
        // transaction would make a concurrent loser surface a busy error
        // instead of "consumed"; the CAS below carries the atomicity.
        let record = sqlx::query_as::<_, RefreshToken>(
            "SELECT id, user_id, token_digest, expires_at, last_used_at, use_count,
                    client_label, created_at
             FROM refresh_token WHERE token_digest = ?1",
        )
        .bind(&old_digest)
        .fetch_optional(&self.db)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        // Expired tokens are destroyed, not silently renewed
        if now > record.expires_at {
            self.discard(&record.id, &old_digest).await?;
            return Ok(None);
        }

        // Re-validate the owner: a lapsed subscription or locked account
        // must cut off rotation immediately
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, status, login_digest, login_prefix, recovery_digest, created_at
             FROM user WHERE id = ?1 AND status = 'active'",
        )
        .bind(&record.user_id)
        .fetch_optional(&self.db)
        .await?;

        let still_subscribed = match &user {
            Some(user) => subscription::current_subscription(&self.db, &user.id)
                .await?
                .is_some(),
            None => false,
        };

        let Some(user) = user.filter(|_| still_subscribed) else {
            self.discard(&record.id, &old_digest).await?;
            return Ok(None);
        };

        // Compare-and-swap on the digest: the WHERE clause matches zero
        // rows if another exchange rotated this record first
        let new_raw = generate_raw_token();
        let new_expires = now + Duration::days(self.config.auth.refresh_token_ttl_days);

        let result = sqlx::query(
            "UPDATE refresh_token
             SET token_digest = ?1, expires_at = ?2, last_used_at = ?3, use_count = use_count + 1
             WHERE id = ?4 AND token_digest = ?5",
        )
        .bind(digest(&new_raw))
        .bind(new_expires)
        .bind(now)
        .bind(&record.id)
        .bind(&old_digest)
        .execute(&self.db)
        .await?;

        if result.rows_affected() != 1 {
            return Ok(None);
        }

        self.prune_excess(&user.id).await?;

        Ok(Some((user, new_raw)))
    }

    /// Remove a dead record, but only while it still holds the digest the
    /// caller presented; a concurrently rotated record is left alone
    async fn discard(&self, token_id: &str, token_digest: &str) -> VpnResult<()> {
        sqlx::query("DELETE FROM refresh_token WHERE id = ?1 AND token_digest = ?2")
            .bind(token_id)
            .bind(token_digest)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Revoke a single token by its raw value (explicit logout)
    pub async fn revoke(&self, raw: &str) -> VpnResult<()> {
        sqlx::query("DELETE FROM refresh_token WHERE token_digest = ?1")
            .bind(digest(raw))
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Revoke every refresh token for a user. Called when a subscription
    /// transitions out of "current" and on account lock/close/delete.
    pub async fn revoke_all(&self, user_id: &str) -> VpnResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        let revoked = result.rows_affected();
        if revoked > 0 {
            tracing::info!(user_id, revoked, "Revoked refresh tokens");
        }

        Ok(revoked)
    }

    /// Delete expired tokens across all users (background job)
    pub async fn cleanup_expired(&self) -> VpnResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Enforce the per-user ceiling: keep the N most recently used tokens,
    /// drop the rest oldest-last-used-first
    async fn prune_excess(&self, user_id: &str) -> VpnResult<()> {
        sqlx::query(
            "DELETE FROM refresh_token
             WHERE user_id = ?1 AND id NOT IN (
                 SELECT id FROM refresh_token
                 WHERE user_id = ?1
                 ORDER BY last_used_at DESC, id DESC
                 LIMIT ?2
             )",
        )
        .bind(user_id)
        .bind(self.config.auth.refresh_token_limit)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

/// One-way digest of a raw token value
fn digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate an opaque random token value
fn generate_raw_token() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests_support::test_config;
    use crate::db::test_pool;

    async fn seed_user(db: &SqlitePool, id: &str) -> User {
        sqlx::query("INSERT INTO user (id, status, created_at) VALUES (?1, 'active', ?2)")
            .bind(id)
            .bind(Utc::now())
            .execute(db)
            .await
            .unwrap();

        fetch_user(db, id).await
    }

    async fn fetch_user(db: &SqlitePool, id: &str) -> User {
        sqlx::query_as::<_, User>(
            "SELECT id, email, status, login_digest, login_prefix, recovery_digest, created_at
             FROM user WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(db)
        .await
        .unwrap()
    }

    async fn seed_subscription(db: &SqlitePool, user_id: &str, days: i64) {
        let now = Utc::now();
        sqlx::query("INSERT OR IGNORE INTO plan (id, name, device_limit) VALUES ('p1', 'Basic', 2)")
            .execute(db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO subscription (id, user_id, plan_id, status, started_at, expires_at)
             VALUES (?1, ?2, 'p1', 'active', ?3, ?4)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(now)
        .bind(now + Duration::days(days))
        .execute(db)
        .await
        .unwrap();
    }

    async fn setup() -> (SqlitePool, RefreshTokenService, User) {
        let db = test_pool().await;
        let user = seed_user(&db, "u1").await;
        seed_subscription(&db, "u1", 30).await;
        let service = RefreshTokenService::new(db.clone(), Arc::new(test_config()));
        (db, service, user)
    }

    async fn token_count(db: &SqlitePool, user_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM refresh_token WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_stores_digest_not_raw() {
        let (db, service, user) = setup().await;
        let raw = service.issue(&user, Some("laptop")).await.unwrap().unwrap();

        let stored: String = sqlx::query_scalar("SELECT token_digest FROM refresh_token")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_ne!(stored, raw);
        assert_eq!(stored, digest(&raw));
    }

    #[tokio::test]
    async fn test_exchange_rotates_value() {
        let (db, service, user) = setup().await;
        let raw = service.issue(&user, None).await.unwrap().unwrap();

        let (exchanged_user, new_raw) = service.exchange(&raw).await.unwrap().unwrap();
        assert_eq!(exchanged_user.id, user.id);
        assert_ne!(new_raw, raw);

        // The old value is consumed: replaying it loses
        assert!(service.exchange(&raw).await.unwrap().is_none());

        // The new value works and the record was reused, not duplicated
        assert!(service.exchange(&new_raw).await.unwrap().is_some());
        assert_eq!(token_count(&db, &user.id).await, 1);

        let use_count: i64 = sqlx::query_scalar("SELECT use_count FROM refresh_token")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(use_count, 2);
    }

    // A single-connection in-memory pool cannot interleave two exchanges,
    // so this runs over a file-backed pool with the production settings
    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_exchange_has_one_winner_and_a_quiet_loser() {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::db::create_pool(
            &dir.path().join("tokens.sqlite"),
            crate::db::DatabaseOptions::default(),
        )
        .await
        .unwrap();
        crate::db::run_migrations(&db).await.unwrap();

        let user = seed_user(&db, "u1").await;
        seed_subscription(&db, "u1", 30).await;
        let service = RefreshTokenService::new(db.clone(), Arc::new(test_config()));

        for _ in 0..20 {
            let raw = service.issue(&user, None).await.unwrap().unwrap();

            let (a, b) = tokio::join!(service.exchange(&raw), service.exchange(&raw));
            // Neither side may error: the loser reports the token as
            // consumed, exactly like a replay
            let a = a.unwrap();
            let b = b.unwrap();

            assert_eq!(
                a.is_some() as u32 + b.is_some() as u32,
                1,
                "exactly one exchange must win"
            );

            let winner = a.or(b).unwrap();
            service.revoke(&winner.1).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_exchange_unknown_token_fails() {
        let (_db, service, _user) = setup().await;
        assert!(service.exchange("no-such-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_destroyed_on_exchange() {
        let (db, service, user) = setup().await;
        let raw = service.issue(&user, None).await.unwrap().unwrap();

        sqlx::query("UPDATE refresh_token SET expires_at = ?1")
            .bind(Utc::now() - Duration::days(1))
            .execute(&db)
            .await
            .unwrap();

        assert!(service.exchange(&raw).await.unwrap().is_none());
        assert_eq!(token_count(&db, &user.id).await, 0);
    }

    #[tokio::test]
    async fn test_exchange_fails_without_current_subscription() {
        let (db, service, user) = setup().await;
        let raw = service.issue(&user, None).await.unwrap().unwrap();

        sqlx::query("UPDATE subscription SET status = 'cancelled'")
            .execute(&db)
            .await
            .unwrap();

        assert!(service.exchange(&raw).await.unwrap().is_none());
        // The record is destroyed, not left around
        assert_eq!(token_count(&db, &user.id).await, 0);
    }

    #[tokio::test]
    async fn test_exchange_fails_for_locked_user() {
        let (db, service, user) = setup().await;
        let raw = service.issue(&user, None).await.unwrap().unwrap();

        sqlx::query("UPDATE user SET status = 'locked' WHERE id = 'u1'")
            .execute(&db)
            .await
            .unwrap();

        assert!(service.exchange(&raw).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ceiling_keeps_most_recently_used() {
        let (db, service, user) = setup().await;
        let limit = test_config().auth.refresh_token_limit;

        let mut raws = Vec::new();
        for i in 0..=limit {
            // Distinct last_used_at ordering
            let raw = service
                .issue(&user, Some(&format!("client-{}", i)))
                .await
                .unwrap()
                .unwrap();
            sqlx::query("UPDATE refresh_token SET last_used_at = ?1 WHERE token_digest = ?2")
                .bind(Utc::now() + Duration::seconds(i))
                .bind(digest(&raw))
                .execute(&db)
                .await
                .unwrap();
            raws.push(raw);
        }

        // Re-prune with the adjusted timestamps
        service.prune_excess(&user.id).await.unwrap();

        assert_eq!(token_count(&db, &user.id).await, limit);

        // The oldest-by-last-use token is the one that was dropped
        let oldest: Option<String> =
            sqlx::query_scalar("SELECT id FROM refresh_token WHERE token_digest = ?1")
                .bind(digest(&raws[0]))
                .fetch_optional(&db)
                .await
                .unwrap();
        assert!(oldest.is_none());
    }

    #[tokio::test]
    async fn test_issue_requires_subscription() {
        let db = test_pool().await;
        let user = seed_user(&db, "u2").await;
        let service = RefreshTokenService::new(db, Arc::new(test_config()));

        assert!(service.issue(&user, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_kills_future_exchanges() {
        let (db, service, user) = setup().await;
        let raw_a = service.issue(&user, None).await.unwrap().unwrap();
        let raw_b = service.issue(&user, None).await.unwrap().unwrap();

        let revoked = service.revoke_all(&user.id).await.unwrap();
        assert_eq!(revoked, 2);
        assert_eq!(token_count(&db, &user.id).await, 0);

        assert!(service.exchange(&raw_a).await.unwrap().is_none());
        assert!(service.exchange(&raw_b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_single_token() {
        let (db, service, user) = setup().await;
        let raw_a = service.issue(&user, None).await.unwrap().unwrap();
        let raw_b = service.issue(&user, None).await.unwrap().unwrap();

        service.revoke(&raw_a).await.unwrap();

        assert!(service.exchange(&raw_a).await.unwrap().is_none());
        assert!(service.exchange(&raw_b).await.unwrap().is_some());
        assert_eq!(token_count(&db, &user.id).await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let (db, service, user) = setup().await;
        service.issue(&user, None).await.unwrap().unwrap();
        service.issue(&user, None).await.unwrap().unwrap();

        sqlx::query(
            "UPDATE refresh_token SET expires_at = ?1
             WHERE id IN (SELECT id FROM refresh_token LIMIT 1)",
        )
        .bind(Utc::now() - Duration::days(1))
        .execute(&db)
        .await
        .unwrap();

        let removed = service.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(token_count(&db, &user.id).await, 1);
    }
}

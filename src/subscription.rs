/// Subscription queries
///
/// "Current subscription" is always computed from the subscription table,
/// never cached on the user: the latest active, non-expired subscription
/// (ordered by expiry, newest first) wins.
use crate::db::models::{Plan, Subscription};
use crate::error::VpnResult;
use chrono::Utc;
use sqlx::SqlitePool;

/// Find the user's current subscription, if any.
///
/// If the latest-expiring active subscription is already past its expiry,
/// every other active one is too, so fetching that single row and applying
/// the access predicate is equivalent to filtering in SQL.
pub async fn current_subscription<'e, E>(db: E, user_id: &str) -> VpnResult<Option<Subscription>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let subscription = sqlx::query_as::<_, Subscription>(
        "SELECT id, user_id, plan_id, status, started_at, expires_at
         FROM subscription
         WHERE user_id = ?1 AND status = 'active'
         ORDER BY expires_at DESC
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(subscription.filter(|s| s.grants_access(Utc::now())))
}

/// The plan backing the user's current subscription, if any
pub async fn current_plan(db: &SqlitePool, user_id: &str) -> VpnResult<Option<Plan>> {
    let Some(subscription) = current_subscription(db, user_id).await? else {
        return Ok(None);
    };

    let plan = sqlx::query_as::<_, Plan>("SELECT id, name, device_limit FROM plan WHERE id = ?1")
        .bind(&subscription.plan_id)
        .fetch_optional(db)
        .await?;

    Ok(plan)
}

/// Whether the user currently has access
pub async fn has_access(db: &SqlitePool, user_id: &str) -> VpnResult<bool> {
    Ok(current_subscription(db, user_id).await?.is_some())
}

/// Device limit granted by the user's current plan, or the default
pub async fn device_limit(db: &SqlitePool, user_id: &str, default_limit: i64) -> VpnResult<i64> {
    let plan = current_plan(db, user_id).await?;
    Ok(plan.map(|p| p.device_limit).unwrap_or(default_limit))
}

/// Flip lapsed subscriptions to expired, returning the affected user ids.
/// The caller revokes refresh tokens and reconciles registry state for each.
pub async fn expire_lapsed(db: &SqlitePool) -> VpnResult<Vec<String>> {
    let now = Utc::now();

    let user_ids: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM subscription
         WHERE status = 'active' AND expires_at <= ?1",
    )
    .bind(now)
    .fetch_all(db)
    .await?;

    if user_ids.is_empty() {
        return Ok(user_ids);
    }

    sqlx::query(
        "UPDATE subscription SET status = 'expired'
         WHERE status = 'active' AND expires_at <= ?1",
    )
    .bind(now)
    .execute(db)
    .await?;

    Ok(user_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::Duration;

    async fn seed_user(db: &SqlitePool, id: &str) {
        sqlx::query("INSERT INTO user (id, status, created_at) VALUES (?1, 'active', ?2)")
            .bind(id)
            .bind(Utc::now())
            .execute(db)
            .await
            .unwrap();
    }

    async fn seed_plan(db: &SqlitePool, id: &str, device_limit: i64) {
        sqlx::query("INSERT INTO plan (id, name, device_limit) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind("Test Plan")
            .bind(device_limit)
            .execute(db)
            .await
            .unwrap();
    }

    async fn seed_subscription(
        db: &SqlitePool,
        id: &str,
        user_id: &str,
        plan_id: &str,
        status: &str,
        expires_in: Duration,
    ) {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO subscription (id, user_id, plan_id, status, started_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(id)
        .bind(user_id)
        .bind(plan_id)
        .bind(status)
        .bind(now)
        .bind(now + expires_in)
        .execute(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_current_subscription_prefers_latest_active() {
        let db = test_pool().await;
        seed_user(&db, "u1").await;
        seed_plan(&db, "p1", 2).await;

        seed_subscription(&db, "s1", "u1", "p1", "active", Duration::days(5)).await;
        seed_subscription(&db, "s2", "u1", "p1", "active", Duration::days(30)).await;
        seed_subscription(&db, "s3", "u1", "p1", "cancelled", Duration::days(90)).await;

        let current = current_subscription(&db, "u1").await.unwrap().unwrap();
        assert_eq!(current.id, "s2");
    }

    #[tokio::test]
    async fn test_expired_subscription_grants_no_access() {
        let db = test_pool().await;
        seed_user(&db, "u1").await;
        seed_plan(&db, "p1", 2).await;
        seed_subscription(&db, "s1", "u1", "p1", "active", Duration::days(-1)).await;

        assert!(!has_access(&db, "u1").await.unwrap());
        assert!(current_subscription(&db, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_current_plan_follows_current_subscription() {
        let db = test_pool().await;
        seed_user(&db, "u1").await;
        seed_plan(&db, "p1", 5).await;

        assert!(current_plan(&db, "u1").await.unwrap().is_none());

        seed_subscription(&db, "s1", "u1", "p1", "active", Duration::days(10)).await;
        let plan = current_plan(&db, "u1").await.unwrap().unwrap();
        assert_eq!(plan.id, "p1");
        assert_eq!(plan.device_limit, 5);
    }

    #[tokio::test]
    async fn test_device_limit_falls_back_to_default() {
        let db = test_pool().await;
        seed_user(&db, "u1").await;
        seed_plan(&db, "p1", 7).await;

        assert_eq!(device_limit(&db, "u1", 3).await.unwrap(), 3);

        seed_subscription(&db, "s1", "u1", "p1", "active", Duration::days(10)).await;
        assert_eq!(device_limit(&db, "u1", 3).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_expire_lapsed_flips_status() {
        let db = test_pool().await;
        seed_user(&db, "u1").await;
        seed_user(&db, "u2").await;
        seed_plan(&db, "p1", 2).await;
        seed_subscription(&db, "s1", "u1", "p1", "active", Duration::seconds(-10)).await;
        seed_subscription(&db, "s2", "u2", "p1", "active", Duration::days(10)).await;

        let affected = expire_lapsed(&db).await.unwrap();
        assert_eq!(affected, vec!["u1".to_string()]);

        let status: String = sqlx::query_scalar("SELECT status FROM subscription WHERE id = 's1'")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(status, "expired");

        // Second run is a no-op
        assert!(expire_lapsed(&db).await.unwrap().is_empty());
    }
}

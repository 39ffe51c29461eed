/// Background task implementations
use crate::{context::AppContext, error::VpnResult, subscription};
use tracing::warn;

/// Flip lapsed subscriptions to expired, then revoke refresh tokens and
/// deauthorize devices for every affected user. Each user is handled
/// independently so one failure does not stall the sweep.
pub async fn sweep_lapsed_subscriptions(ctx: &AppContext) -> VpnResult<u64> {
    let user_ids = subscription::expire_lapsed(&ctx.db).await?;
    let mut swept = 0u64;

    for user_id in &user_ids {
        if let Err(e) = ctx.refresh_tokens.revoke_all(user_id).await {
            warn!(user_id, "Sweep could not revoke refresh tokens: {}", e);
            continue;
        }
        if let Err(e) = ctx.devices.reconcile_user(user_id).await {
            warn!(user_id, "Sweep could not reconcile devices: {}", e);
            continue;
        }
        swept += 1;
    }

    Ok(swept)
}

/// Delete refresh token records past their expiry
pub async fn cleanup_expired_refresh_tokens(ctx: &AppContext) -> VpnResult<u64> {
    ctx.refresh_tokens.cleanup_expired().await
}

/// Rebuild the data-plane registry from relational state
pub async fn rebuild_registry(ctx: &AppContext) -> VpnResult<()> {
    ctx.registry.rebuild_all(&ctx.db).await
}

/// Health check: verify database connectivity
pub async fn health_check(ctx: &AppContext) -> VpnResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

/// Account endpoints
use crate::{
    account::CreateAccountRequest,
    auth::AuthContext,
    context::AppContext,
    error::VpnResult,
    subscription,
};
use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/recover", post(recover_credential))
        .route("/accounts/me", get(get_account))
        .route("/accounts/me", delete(delete_account))
}

/// Account creation response. The passphrase and recovery code appear here
/// and nowhere else, ever again.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountResponse {
    pub user_id: String,
    pub email: Option<String>,
    pub passphrase: String,
    pub recovery_code: String,
}

async fn create_account(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateAccountRequest>,
) -> VpnResult<Json<CreateAccountResponse>> {
    let created = ctx.accounts.create_account(req).await?;

    Ok(Json(CreateAccountResponse {
        user_id: created.user.id,
        email: created.user.email,
        passphrase: created.credential.passphrase,
        recovery_code: created.credential.recovery_code,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoverRequest {
    pub user_id: String,
    pub recovery_code: String,
    pub factor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoverResponse {
    pub passphrase: String,
    pub recovery_code: String,
}

/// Reissue the credential against a valid recovery code. All live
/// sessions for the account are revoked.
async fn recover_credential(
    State(ctx): State<AppContext>,
    Json(req): Json<RecoverRequest>,
) -> VpnResult<Json<RecoverResponse>> {
    let credential = ctx
        .accounts
        .recover_credential(&req.user_id, &req.recovery_code, req.factor.as_deref())
        .await?;

    Ok(Json(RecoverResponse {
        passphrase: credential.passphrase,
        recovery_code: credential.recovery_code,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountInfo {
    pub user_id: String,
    pub email: Option<String>,
    pub status: String,
    pub has_access: bool,
    pub device_limit: i64,
}

async fn get_account(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> VpnResult<Json<AccountInfo>> {
    let user = ctx.accounts.get_user(&auth.user_id).await?;
    let has_access = subscription::has_access(&ctx.db, &user.id).await?;
    let device_limit = subscription::device_limit(
        &ctx.db,
        &user.id,
        ctx.config.devices.default_device_limit,
    )
    .await?;

    Ok(Json(AccountInfo {
        user_id: user.id,
        email: user.email,
        status: user.status.as_str().to_string(),
        has_access,
        device_limit,
    }))
}

async fn delete_account(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> VpnResult<Json<serde_json::Value>> {
    ctx.accounts.delete_account(&auth.user_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

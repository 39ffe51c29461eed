/// Session endpoints: login, refresh, logout
use crate::{
    auth::AuthContext,
    context::AppContext,
    db::models::User,
    error::{VpnError, VpnResult},
};
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/session", post(create_session))
        .route("/session/refresh", post(refresh_session))
        .route("/session/logout", post(logout))
        .route("/session/logout-all", post(logout_all))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Full login identifier: passphrase, optionally with the second
    /// factor appended
    pub passphrase: String,
    /// Optional email to resolve the account directly
    pub email: Option<String>,
    /// Free-form label stored with the refresh token ("laptop", "phone")
    pub client_label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Exchange a credential for a token pair.
///
/// Credential failures are a uniform 401 with no detail. A valid
/// credential on an account that may not act is a 403, and a valid
/// credential without a subscription is a 402.
async fn create_session(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateSessionRequest>,
) -> VpnResult<Json<SessionResponse>> {
    let user = ctx
        .credentials
        .authenticate(&req.passphrase, req.email.as_deref())
        .await
        .ok_or(VpnError::Authentication)?;

    issue_session(&ctx, &user, req.client_label.as_deref()).await
}

async fn issue_session(
    ctx: &AppContext,
    user: &User,
    client_label: Option<&str>,
) -> VpnResult<Json<SessionResponse>> {
    if !user.can_authenticate() {
        return Err(VpnError::Authorization(
            "Account is not in good standing".to_string(),
        ));
    }

    let access_token = ctx
        .access_tokens
        .issue(user)
        .await?
        .ok_or(VpnError::SubscriptionRequired)?;
    let refresh_token = ctx
        .refresh_tokens
        .issue(user, client_label)
        .await?
        .ok_or(VpnError::SubscriptionRequired)?;

    Ok(Json(SessionResponse {
        user_id: user.id.clone(),
        access_token,
        refresh_token,
        expires_in: ctx.config.auth.access_token_ttl_secs,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Rotate a refresh token and mint a fresh access token. The presented
/// token value is spent whether or not the exchange succeeds.
async fn refresh_session(
    State(ctx): State<AppContext>,
    Json(req): Json<RefreshRequest>,
) -> VpnResult<Json<SessionResponse>> {
    let (user, refresh_token) = ctx
        .refresh_tokens
        .exchange(&req.refresh_token)
        .await?
        .ok_or(VpnError::Authentication)?;

    let access_token = ctx
        .access_tokens
        .issue(&user)
        .await?
        .ok_or(VpnError::SubscriptionRequired)?;

    Ok(Json(SessionResponse {
        user_id: user.id.clone(),
        access_token,
        refresh_token,
        expires_in: ctx.config.auth.access_token_ttl_secs,
    }))
}

/// Revoke the presented refresh token. Always succeeds; revoking an
/// unknown token discloses nothing.
async fn logout(
    State(ctx): State<AppContext>,
    Json(req): Json<RefreshRequest>,
) -> VpnResult<Json<serde_json::Value>> {
    ctx.refresh_tokens.revoke(&req.refresh_token).await?;
    Ok(Json(serde_json::json!({ "revoked": true })))
}

/// Revoke every refresh token for the authenticated user
async fn logout_all(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> VpnResult<Json<serde_json::Value>> {
    let revoked = ctx.refresh_tokens.revoke_all(&auth.user_id).await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

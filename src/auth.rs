/// Authentication extractors
use crate::{
    api::middleware::extract_bearer_token,
    context::AppContext,
    error::VpnError,
    token::AccessClaims,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated context, extracted from a bearer access token.
///
/// Verification is purely cryptographic: no database read, and claims may
/// be up to one token lifetime stale relative to account or subscription
/// state. Handlers that mutate state re-check the database themselves.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub claims: AccessClaims,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = VpnError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers).ok_or(VpnError::Authentication)?;

        let claims = state
            .access_tokens
            .verify(&token)
            .ok_or(VpnError::Authentication)?;

        Ok(AuthContext {
            user_id: claims.sub.clone(),
            claims,
        })
    }
}

/// Token issuance and rotation
///
/// Two token kinds: short-lived self-verifying access tokens (EdDSA-signed,
/// no server-side session state) and longer-lived opaque refresh tokens
/// that rotate on every exchange.

mod issuer;
mod refresh;

pub use issuer::{AccessTokenService, TokenKeys};
pub use refresh::RefreshTokenService;

use serde::{Deserialize, Serialize};

/// Claims carried by an access token.
///
/// `sub_exp` embeds the subscription expiry at issuance so relying services
/// can gate on it without a billing-store lookup. It is not re-checked
/// during the token's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: user id
    pub sub: String,
    /// Issued-at (Unix timestamp)
    pub iat: i64,
    /// Expiry (Unix timestamp)
    pub exp: i64,
    /// Subscription expiry at issuance (Unix timestamp)
    pub sub_exp: i64,
    /// Random per-token identifier for auditing
    pub jti: String,
}

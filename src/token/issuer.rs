/// Access token issuance and offline verification
use crate::{
    config::AuthConfig,
    db::models::User,
    error::{VpnError, VpnResult},
    subscription,
    token::AccessClaims,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, Header, Validation};
use ring::{
    rand::SystemRandom,
    signature::{Ed25519KeyPair, KeyPair},
};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Ed25519 key material, constructed once at startup and passed in
/// explicitly. The private half never leaves the issuer; the public half is
/// distributable to any verifier, so verification needs neither a database
/// nor a call back to this service.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: jsonwebtoken::EncodingKey,
    decoding: DecodingKey,
    public_key: Vec<u8>,
}

impl TokenKeys {
    /// Build keys from configuration. Production requires externally
    /// supplied key material and fails hard without it; everything else may
    /// fall back to an ephemeral keypair.
    pub fn from_config(auth: &AuthConfig) -> VpnResult<Self> {
        match &auth.signing_key {
            Some(encoded) => {
                let der = BASE64
                    .decode(encoded)
                    .map_err(|e| VpnError::Validation(format!("Invalid signing key: {}", e)))?;
                Self::from_pkcs8(&der)
            }
            None if auth.production => Err(VpnError::Validation(
                "Signing key must be supplied in production".to_string(),
            )),
            None => {
                tracing::warn!("No signing key configured; generating ephemeral keypair");
                Self::ephemeral()
            }
        }
    }

    /// Generate a one-process-lifetime keypair (non-production only)
    pub fn ephemeral() -> VpnResult<Self> {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| VpnError::Internal("Ed25519 key generation failed".to_string()))?;
        Self::from_pkcs8(document.as_ref())
    }

    fn from_pkcs8(der: &[u8]) -> VpnResult<Self> {
        let pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(der)
            .map_err(|_| VpnError::Validation("Invalid Ed25519 PKCS#8 key".to_string()))?;
        let public_key = pair.public_key().as_ref().to_vec();

        Ok(Self {
            encoding: jsonwebtoken::EncodingKey::from_ed_der(der),
            decoding: DecodingKey::from_ed_der(&public_key),
            public_key,
        })
    }

    /// Raw Ed25519 public key bytes, for distribution to verifiers
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

/// Access token service
#[derive(Clone)]
pub struct AccessTokenService {
    db: SqlitePool,
    keys: TokenKeys,
    ttl_secs: i64,
}

impl AccessTokenService {
    /// Create a new access token service
    pub fn new(db: SqlitePool, keys: TokenKeys, ttl_secs: i64) -> Self {
        Self { db, keys, ttl_secs }
    }

    /// Mint a signed access token for the user.
    ///
    /// Returns `None` when the user may not act or holds no current
    /// subscription; surfacing the specific reason is the caller's job.
    pub async fn issue(&self, user: &User) -> VpnResult<Option<String>> {
        if !user.can_authenticate() {
            return Ok(None);
        }

        let Some(current) = subscription::current_subscription(&self.db, &user.id).await? else {
            return Ok(None);
        };

        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user.id.clone(),
            iat: now,
            exp: now + self.ttl_secs,
            sub_exp: current.expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::EdDSA), &claims, &self.keys.encoding)
            .map_err(|e| VpnError::Token(format!("Failed to sign access token: {}", e)))?;

        Ok(Some(token))
    }

    /// Verify a token offline: signature, expiry, shape. Pure computation;
    /// subscription status is not re-checked within the token's TTL
    /// window. Any failure is `None`.
    pub fn verify(&self, token: &str) -> Option<AccessClaims> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;

        match decode::<AccessClaims>(token, &self.keys.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!("access token rejected: {}", e);
                None
            }
        }
    }
}

/// Credential issuance and verification
use crate::{
    config::ServerConfig,
    credential::IssuedCredential,
    db::models::User,
    error::{VpnError, VpnResult},
    words::PASSPHRASE_WORDS,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Number of words in a generated passphrase
const PASSPHRASE_WORD_COUNT: usize = 7;

/// Joiner between passphrase words
const WORD_JOINER: char = '-';

/// Separator between the generated secret and an optional user factor.
/// Fixed and absent from the word list, so splitting is unambiguous and
/// "secret alone" and "secret + factor" share one storage column.
const FACTOR_SEPARATOR: char = ':';

/// Length of the stored lookup prefix (hex characters). Enough to avoid a
/// table scan; never enough to authenticate on its own.
const LOOKUP_PREFIX_LEN: usize = 16;

/// Credential service
#[derive(Clone)]
pub struct CredentialService {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl CredentialService {
    /// Create a new credential service
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Issue a fresh credential for a user, replacing any previous one.
    ///
    /// Called at account creation and on explicit regeneration. The returned
    /// raw values exist nowhere else; only digests are persisted.
    pub async fn issue(
        &self,
        user_id: &str,
        factor: Option<&str>,
    ) -> VpnResult<IssuedCredential> {
        let passphrase = generate_passphrase();
        let identifier = match factor {
            Some(factor) if !factor.is_empty() => {
                format!("{}{}{}", passphrase, FACTOR_SEPARATOR, factor)
            }
            _ => passphrase.clone(),
        };

        let login_digest = self.hash_identifier(&identifier)?;
        let login_prefix = lookup_prefix(&passphrase);

        // Recovery secret is independent of the passphrase
        let recovery_code = generate_recovery_code();
        let recovery_digest = sha256_hex(&recovery_code);

        let result = sqlx::query(
            "UPDATE user
             SET login_digest = ?1, login_prefix = ?2, recovery_digest = ?3
             WHERE id = ?4 AND status != 'deleted'",
        )
        .bind(&login_digest)
        .bind(&login_prefix)
        .bind(&recovery_digest)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VpnError::NotFound("User not found".to_string()));
        }

        Ok(IssuedCredential {
            passphrase,
            recovery_code,
        })
    }

    /// Verify a submitted identifier, returning the user on success.
    ///
    /// With an email the user is resolved directly; otherwise candidates are
    /// found via the lookup prefix of the secret portion. Every failure mode
    /// (wrong secret, unknown user, verification error) collapses to `None`;
    /// locked/closed accounts still verify here and are rejected by the
    /// token layer.
    pub async fn authenticate(&self, candidate: &str, email: Option<&str>) -> Option<User> {
        match self.authenticate_inner(candidate, email).await {
            Ok(user) => user,
            Err(e) => {
                tracing::debug!("credential verification error treated as failure: {}", e);
                None
            }
        }
    }

    async fn authenticate_inner(
        &self,
        candidate: &str,
        email: Option<&str>,
    ) -> VpnResult<Option<User>> {
        let candidates = match email {
            Some(email) => {
                sqlx::query_as::<_, User>(
                    "SELECT id, email, status, login_digest, login_prefix, recovery_digest, created_at
                     FROM user WHERE email = ?1 AND status != 'deleted'",
                )
                .bind(email)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                // Prefix narrows the search; full hash verification below is
                // still what authenticates.
                let secret = secret_portion(candidate);
                sqlx::query_as::<_, User>(
                    "SELECT id, email, status, login_digest, login_prefix, recovery_digest, created_at
                     FROM user WHERE login_prefix = ?1 AND status != 'deleted'",
                )
                .bind(lookup_prefix(secret))
                .fetch_all(&self.db)
                .await?
            }
        };

        for user in candidates {
            let Some(ref digest) = user.login_digest else {
                continue;
            };
            if verify_against(candidate, digest) {
                return Ok(Some(user));
            }
        }

        Ok(None)
    }

    /// Verify a recovery code for a user
    pub async fn verify_recovery(&self, user_id: &str, recovery_code: &str) -> VpnResult<bool> {
        let stored: Option<Option<String>> = sqlx::query_scalar(
            "SELECT recovery_digest FROM user WHERE id = ?1 AND status != 'deleted'",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        match stored.flatten() {
            Some(digest) => Ok(digest == sha256_hex(recovery_code)),
            None => Ok(false),
        }
    }

    /// Hash a full login identifier with Argon2id at the configured cost
    fn hash_identifier(&self, identifier: &str) -> VpnResult<String> {
        let params = Params::new(
            self.config.auth.argon2_memory_kib,
            self.config.auth.argon2_time_cost,
            1,
            None,
        )
        .map_err(|e| VpnError::Internal(format!("Invalid Argon2 parameters: {}", e)))?;

        let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);

        let digest = hasher
            .hash_password(identifier.as_bytes(), &salt)
            .map_err(|e| VpnError::Internal(format!("Passphrase hashing failed: {}", e)))?;

        Ok(digest.to_string())
    }
}

/// Verify a candidate against a stored PHC string; any parse or
/// verification error is a plain mismatch
fn verify_against(candidate: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// The secret portion of a submitted identifier (before any factor)
fn secret_portion(candidate: &str) -> &str {
    candidate
        .split(FACTOR_SEPARATOR)
        .next()
        .unwrap_or(candidate)
}

/// Truncated SHA-256 of the secret portion, used for lookup only
fn lookup_prefix(secret: &str) -> String {
    let mut digest = sha256_hex(secret);
    digest.truncate(LOOKUP_PREFIX_LEN);
    digest
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a multi-word passphrase
fn generate_passphrase() -> String {
    use rand::seq::SliceRandom;

    let mut rng = rand::thread_rng();
    let words: Vec<&str> = (0..PASSPHRASE_WORD_COUNT)
        .map(|_| *PASSPHRASE_WORDS.choose(&mut rng).unwrap_or(&"acorn"))
        .collect();

    words.join(&WORD_JOINER.to_string())
}

/// Generate a recovery code, independent of the passphrase
fn generate_recovery_code() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests_support::test_config;
    use crate::db::test_pool;
    use chrono::Utc;

    async fn setup() -> CredentialService {
        let db = test_pool().await;
        sqlx::query(
            "INSERT INTO user (id, email, status, created_at) VALUES ('u1', 'a@example.com', 'active', ?1)",
        )
        .bind(Utc::now())
        .execute(&db)
        .await
        .unwrap();

        CredentialService::new(db, Arc::new(test_config()))
    }

    #[tokio::test]
    async fn test_issue_then_authenticate() {
        let service = setup().await;

        let credential = service.issue("u1", None).await.unwrap();
        assert_eq!(
            credential.passphrase.split('-').count(),
            PASSPHRASE_WORD_COUNT
        );

        let user = service.authenticate(&credential.passphrase, None).await;
        assert_eq!(user.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn test_single_character_mutation_fails() {
        let service = setup().await;
        let credential = service.issue("u1", None).await.unwrap();

        let mut mutated: Vec<char> = credential.passphrase.chars().collect();
        mutated[0] = if mutated[0] == 'z' { 'a' } else { 'z' };
        let mutated: String = mutated.into_iter().collect();

        assert!(service.authenticate(&mutated, None).await.is_none());
    }

    #[tokio::test]
    async fn test_factor_is_part_of_identifier() {
        let service = setup().await;
        let credential = service.issue("u1", Some("hunter2")).await.unwrap();

        // Secret alone no longer verifies
        assert!(service.authenticate(&credential.passphrase, None).await.is_none());

        let full = format!("{}:hunter2", credential.passphrase);
        assert!(service.authenticate(&full, None).await.is_some());

        let wrong = format!("{}:hunter3", credential.passphrase);
        assert!(service.authenticate(&wrong, None).await.is_none());
    }

    #[tokio::test]
    async fn test_email_lookup() {
        let service = setup().await;
        let credential = service.issue("u1", None).await.unwrap();

        let user = service
            .authenticate(&credential.passphrase, Some("a@example.com"))
            .await;
        assert_eq!(user.unwrap().id, "u1");

        assert!(service
            .authenticate(&credential.passphrase, Some("b@example.com"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_deleted_user_is_scoped_out() {
        let service = setup().await;
        let credential = service.issue("u1", None).await.unwrap();

        sqlx::query("UPDATE user SET status = 'deleted' WHERE id = 'u1'")
            .execute(service_db(&service))
            .await
            .unwrap();

        assert!(service.authenticate(&credential.passphrase, None).await.is_none());
        assert!(service
            .authenticate(&credential.passphrase, Some("a@example.com"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous() {
        let service = setup().await;
        let first = service.issue("u1", None).await.unwrap();
        let second = service.issue("u1", None).await.unwrap();

        assert!(service.authenticate(&first.passphrase, None).await.is_none());
        assert!(service.authenticate(&second.passphrase, None).await.is_some());
    }

    #[tokio::test]
    async fn test_recovery_code() {
        let service = setup().await;
        let credential = service.issue("u1", None).await.unwrap();

        assert!(service
            .verify_recovery("u1", &credential.recovery_code)
            .await
            .unwrap());
        assert!(!service.verify_recovery("u1", "0000").await.unwrap());
        assert!(!service
            .verify_recovery("missing", &credential.recovery_code)
            .await
            .unwrap());
    }

    fn service_db(service: &CredentialService) -> &SqlitePool {
        &service.db
    }
}

use crate::{
    account::{CreateAccountRequest, CreatedAccount},
    config::ServerConfig,
    credential::{CredentialService, IssuedCredential},
    db::models::{User, UserStatus},
    device::DeviceManager,
    error::{VpnError, VpnResult},
    token::RefreshTokenService,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Account lifecycle manager. Coordinates the credential store, refresh
/// token service and device manager so status changes cascade in one call.
#[derive(Clone)]
pub struct AccountManager {
    db: SqlitePool,
    credentials: CredentialService,
    refresh_tokens: RefreshTokenService,
    devices: DeviceManager,
}

impl AccountManager {
    pub fn new(
        db: SqlitePool,
        config: Arc<ServerConfig>,
        devices: DeviceManager,
    ) -> Self {
        Self {
            credentials: CredentialService::new(db.clone(), config.clone()),
            refresh_tokens: RefreshTokenService::new(db.clone(), config),
            devices,
            db,
        }
    }

    /// Create a new account and issue its first credential.
    ///
    /// The returned passphrase and recovery code are shown exactly once;
    /// nothing recoverable is persisted.
    pub async fn create_account(&self, request: CreateAccountRequest) -> VpnResult<CreatedAccount> {
        let email = match request.email {
            Some(email) => {
                let email = email.trim().to_lowercase();
                if !email.contains('@') || email.len() > 254 {
                    return Err(VpnError::Validation("Invalid email address".to_string()));
                }
                let taken: Option<String> =
                    sqlx::query_scalar("SELECT id FROM user WHERE email = ?1")
                        .bind(&email)
                        .fetch_optional(&self.db)
                        .await?;
                if taken.is_some() {
                    return Err(VpnError::Conflict(
                        "Email is already registered".to_string(),
                    ));
                }
                Some(email)
            }
            None => None,
        };

        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO user (id, email, status, created_at) VALUES (?1, ?2, 'active', ?3)")
            .bind(&id)
            .bind(&email)
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        let credential = self
            .credentials
            .issue(&id, request.factor.as_deref())
            .await?;
        let user = self.get_user(&id).await?;

        info!(user_id = %user.id, with_email = email.is_some(), "Created account");
        Ok(CreatedAccount { user, credential })
    }

    /// Fetch a user by id. Deleted accounts read as not found.
    pub async fn get_user(&self, user_id: &str) -> VpnResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, status, login_digest, login_prefix, recovery_digest, created_at
             FROM user WHERE id = ?1 AND status != 'deleted'",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| VpnError::NotFound("User not found".to_string()))
    }

    /// Lock an account: no new tokens, live sessions revoked, devices
    /// deauthorized. Reversible via `unlock`.
    pub async fn lock_account(&self, user_id: &str) -> VpnResult<()> {
        self.set_status(user_id, UserStatus::Locked).await?;
        self.refresh_tokens.revoke_all(user_id).await?;
        self.devices.reconcile_user(user_id).await?;
        info!(user_id, "Locked account");
        Ok(())
    }

    /// Reverse a lock. Devices come back only as far as the subscription
    /// allows.
    pub async fn unlock_account(&self, user_id: &str) -> VpnResult<()> {
        let user = self.get_user(user_id).await?;
        if user.status != UserStatus::Locked {
            return Err(VpnError::Conflict("Account is not locked".to_string()));
        }
        self.set_status(user_id, UserStatus::Active).await?;
        self.devices.reconcile_user(user_id).await?;
        info!(user_id, "Unlocked account");
        Ok(())
    }

    /// Close an account: terminal but the row and devices remain readable
    pub async fn close_account(&self, user_id: &str) -> VpnResult<()> {
        self.set_status(user_id, UserStatus::Closed).await?;
        self.refresh_tokens.revoke_all(user_id).await?;
        self.devices.reconcile_user(user_id).await?;
        info!(user_id, "Closed account");
        Ok(())
    }

    /// Delete an account: credential material wiped, sessions revoked,
    /// devices removed and retracted from the registry. The row itself is
    /// kept under the deleted tag so the id is never reused.
    pub async fn delete_account(&self, user_id: &str) -> VpnResult<()> {
        // Existence check first so deleting twice reads as not found
        self.get_user(user_id).await?;

        sqlx::query(
            "UPDATE user
             SET status = 'deleted', email = NULL,
                 login_digest = NULL, login_prefix = NULL, recovery_digest = NULL
             WHERE id = ?1",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;

        self.refresh_tokens.revoke_all(user_id).await?;
        self.devices.remove_all(user_id).await?;

        info!(user_id, "Deleted account");
        Ok(())
    }

    /// Reissue the credential for a user who presents a valid recovery
    /// code. The old passphrase and recovery code stop working, and all
    /// live sessions are revoked.
    pub async fn recover_credential(
        &self,
        user_id: &str,
        recovery_code: &str,
        factor: Option<&str>,
    ) -> VpnResult<IssuedCredential> {
        let user = self.get_user(user_id).await.map_err(|_| VpnError::Authentication)?;
        if !self
            .credentials
            .verify_recovery(&user.id, recovery_code)
            .await?
        {
            return Err(VpnError::Authentication);
        }

        let credential = self.credentials.issue(&user.id, factor).await?;
        self.refresh_tokens.revoke_all(&user.id).await?;

        info!(user_id = %user.id, "Reissued credential via recovery code");
        Ok(credential)
    }

    async fn set_status(&self, user_id: &str, status: UserStatus) -> VpnResult<()> {
        let result = sqlx::query("UPDATE user SET status = ?1 WHERE id = ?2 AND status != 'deleted'")
            .bind(status)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(VpnError::NotFound("User not found".to_string()));
        }
        Ok(())
    }
}

use crate::{
    config::ServerConfig,
    db::models::{Device, DeviceStatus, User, UserStatus},
    device::{allocator, RegisterDeviceRequest},
    error::{VpnError, VpnResult},
    registry::DeviceRegistry,
    subscription,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Device lifecycle manager.
///
/// The relational store is authoritative; every state change is mirrored
/// into the data-plane registry on a best-effort basis afterwards.
#[derive(Clone)]
pub struct DeviceManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    registry: DeviceRegistry,
}

impl DeviceManager {
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>, registry: DeviceRegistry) -> Self {
        Self {
            db,
            config,
            registry,
        }
    }

    /// Register a new device for the user.
    ///
    /// The device row is always created; whether it starts authorized
    /// depends on the user's subscription and remaining plan capacity.
    /// Addresses are derived from the identity tuple and collision-checked
    /// before insert.
    pub async fn register(
        &self,
        user: &User,
        request: RegisterDeviceRequest,
    ) -> VpnResult<Device> {
        if user.status == UserStatus::Deleted {
            return Err(VpnError::NotFound("User not found".to_string()));
        }
        if request.public_key.trim().is_empty() {
            return Err(VpnError::Validation("Public key cannot be empty".to_string()));
        }

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM device WHERE public_key = ?1")
                .bind(&request.public_key)
                .fetch_optional(&self.db)
                .await?;
        if existing.is_some() {
            return Err(VpnError::Conflict(
                "Public key is already registered".to_string(),
            ));
        }

        let limit = subscription::device_limit(
            &self.db,
            &user.id,
            self.config.devices.default_device_limit,
        )
        .await?;
        let registered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM device WHERE user_id = ?1")
            .bind(&user.id)
            .fetch_one(&self.db)
            .await?;
        if registered >= limit {
            return Err(VpnError::DeviceLimitExceeded(limit));
        }

        let name = match request.name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() || name.len() > 64 {
                    return Err(VpnError::Validation(
                        "Device name must be 1-64 characters".to_string(),
                    ));
                }
                let taken: Option<String> =
                    sqlx::query_scalar("SELECT id FROM device WHERE name = ?1")
                        .bind(&name)
                        .fetch_optional(&self.db)
                        .await?;
                if taken.is_some() {
                    return Err(VpnError::Conflict("Device name is taken".to_string()));
                }
                name
            }
            None => allocator::allocate_name(&self.db).await?,
        };

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let addresses = allocator::allocate(&id, &request.public_key, created_at);
        allocator::ensure_unique(&self.db, &addresses, None).await?;

        // New devices start authorized only while the plan has headroom
        let has_access = subscription::has_access(&self.db, &user.id).await?;
        let active_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM device WHERE user_id = ?1 AND status = 'active'",
        )
        .bind(&user.id)
        .fetch_one(&self.db)
        .await?;
        let status = if user.can_authenticate() && has_access && active_count < limit {
            DeviceStatus::Active
        } else {
            DeviceStatus::Inactive
        };

        sqlx::query(
            "INSERT INTO device (id, user_id, name, public_key, ipv4, ipv6, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&id)
        .bind(&user.id)
        .bind(&name)
        .bind(&request.public_key)
        .bind(addresses.ipv4.to_string())
        .bind(addresses.ipv6.to_string())
        .bind(status)
        .bind(created_at)
        .execute(&self.db)
        .await?;

        let device = Device {
            id,
            user_id: user.id.clone(),
            name,
            public_key: request.public_key,
            ipv4: addresses.ipv4.to_string(),
            ipv6: addresses.ipv6.to_string(),
            status,
            created_at,
        };

        self.registry.upsert(&device).await;
        if device.status == DeviceStatus::Active {
            self.registry
                .set_authorized(&user.id, std::slice::from_ref(&device.id))
                .await;
        }

        info!(
            user_id = %user.id,
            device_id = %device.id,
            name = %device.name,
            "Registered device"
        );
        Ok(device)
    }

    /// List the user's devices, oldest first
    pub async fn list_devices(&self, user_id: &str) -> VpnResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT id, user_id, name, public_key, ipv4, ipv6, status, created_at
             FROM device WHERE user_id = ?1 ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(devices)
    }

    /// Fetch one of the user's devices
    pub async fn get_device(&self, user_id: &str, device_id: &str) -> VpnResult<Device> {
        sqlx::query_as::<_, Device>(
            "SELECT id, user_id, name, public_key, ipv4, ipv6, status, created_at
             FROM device WHERE id = ?1 AND user_id = ?2",
        )
        .bind(device_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| VpnError::NotFound("Device not found".to_string()))
    }

    /// Remove a device and retract it from the registry. Freed capacity may
    /// let another inactive device come back, so reconcile afterwards.
    pub async fn remove(&self, user_id: &str, device_id: &str) -> VpnResult<()> {
        let result = sqlx::query("DELETE FROM device WHERE id = ?1 AND user_id = ?2")
            .bind(device_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(VpnError::NotFound("Device not found".to_string()));
        }

        self.registry.remove(device_id, user_id).await;
        self.reconcile_user(user_id).await?;

        info!(user_id, device_id, "Removed device");
        Ok(())
    }

    /// Replace a device's public key. Addresses are re-derived from the new
    /// tuple, so the device moves to a new address pair atomically with the
    /// key change.
    pub async fn rotate_key(
        &self,
        user_id: &str,
        device_id: &str,
        public_key: &str,
    ) -> VpnResult<Device> {
        if public_key.trim().is_empty() {
            return Err(VpnError::Validation("Public key cannot be empty".to_string()));
        }

        let mut device = self.get_device(user_id, device_id).await?;

        let holder: Option<String> =
            sqlx::query_scalar("SELECT id FROM device WHERE public_key = ?1 AND id != ?2")
                .bind(public_key)
                .bind(device_id)
                .fetch_optional(&self.db)
                .await?;
        if holder.is_some() {
            return Err(VpnError::Conflict(
                "Public key is already registered".to_string(),
            ));
        }

        let addresses = allocator::allocate(device_id, public_key, device.created_at);
        allocator::ensure_unique(&self.db, &addresses, Some(device_id)).await?;

        sqlx::query("UPDATE device SET public_key = ?1, ipv4 = ?2, ipv6 = ?3 WHERE id = ?4")
            .bind(public_key)
            .bind(addresses.ipv4.to_string())
            .bind(addresses.ipv6.to_string())
            .bind(device_id)
            .execute(&self.db)
            .await?;

        device.public_key = public_key.to_string();
        device.ipv4 = addresses.ipv4.to_string();
        device.ipv6 = addresses.ipv6.to_string();

        self.registry.upsert(&device).await;

        info!(user_id, device_id, "Rotated device key");
        Ok(device)
    }

    /// Converge device authorization with the user's entitlement.
    ///
    /// With access, the oldest devices up to the plan limit are active and
    /// the rest inactive; without access, every device is inactive. Only
    /// rows whose status actually changes are written, and the registry is
    /// updated for exactly those.
    pub async fn reconcile_user(&self, user_id: &str) -> VpnResult<()> {
        let devices = self.list_devices(user_id).await?;
        if devices.is_empty() {
            return Ok(());
        }

        let user_active: bool = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user WHERE id = ?1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .map(|n: i64| n > 0)?;

        let entitled = if user_active && subscription::has_access(&self.db, user_id).await? {
            subscription::device_limit(&self.db, user_id, self.config.devices.default_device_limit)
                .await? as usize
        } else {
            0
        };

        let mut to_activate = Vec::new();
        let mut to_deactivate = Vec::new();
        for (position, device) in devices.iter().enumerate() {
            let desired = if position < entitled {
                DeviceStatus::Active
            } else {
                DeviceStatus::Inactive
            };
            if device.status != desired {
                match desired {
                    DeviceStatus::Active => to_activate.push(device.id.clone()),
                    DeviceStatus::Inactive => to_deactivate.push(device.id.clone()),
                }
            }
        }

        if to_activate.is_empty() && to_deactivate.is_empty() {
            debug!(user_id, "Device authorization already converged");
            return Ok(());
        }

        for id in &to_activate {
            sqlx::query("UPDATE device SET status = 'active' WHERE id = ?1")
                .bind(id)
                .execute(&self.db)
                .await?;
        }
        for id in &to_deactivate {
            sqlx::query("UPDATE device SET status = 'inactive' WHERE id = ?1")
                .bind(id)
                .execute(&self.db)
                .await?;
        }

        self.registry.set_authorized(user_id, &to_activate).await;
        self.registry.set_unauthorized(user_id, &to_deactivate).await;

        info!(
            user_id,
            activated = to_activate.len(),
            deactivated = to_deactivate.len(),
            "Reconciled device authorization"
        );
        Ok(())
    }

    /// Delete all of a user's devices (account deletion path)
    pub async fn remove_all(&self, user_id: &str) -> VpnResult<u64> {
        let devices = self.list_devices(user_id).await?;

        let result = sqlx::query("DELETE FROM device WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        for device in &devices {
            self.registry.remove(&device.id, user_id).await;
        }

        Ok(result.rows_affected())
    }
}

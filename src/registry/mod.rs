/// Data-plane device registry
///
/// The relay fleet answers "may this device pass traffic?" per connection
/// attempt and cannot afford a relational query. This module projects
/// device identity and authorization into Redis: one JSON record per
/// device plus a global active-device set and a per-user active set for
/// O(1) membership checks.
///
/// Every write here is best-effort: the relational store is the source of
/// truth, failures are logged and swallowed, and `rebuild_all` converges
/// the projection after any amount of drift or data loss.

use crate::{
    config::RegistryConfig,
    db::models::Device,
    error::{VpnError, VpnResult},
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Static per-device record readable by the data-plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryDevice {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub public_key: String,
    pub ipv4: String,
    pub ipv6: String,
}

impl From<&Device> for RegistryDevice {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            user_id: device.user_id.clone(),
            name: device.name.clone(),
            public_key: device.public_key.clone(),
            ipv4: device.ipv4.clone(),
            ipv6: device.ipv6.clone(),
        }
    }
}

/// Registry client. When disabled (or the connection failed at startup),
/// every operation is a logged no-op and the relational store remains
/// authoritative.
#[derive(Clone)]
pub struct DeviceRegistry {
    connection: Option<ConnectionManager>,
    config: RegistryConfig,
}

impl DeviceRegistry {
    /// Connect to the configured Redis instance. A failed connection
    /// degrades to disabled mode rather than failing startup.
    pub async fn connect(config: RegistryConfig) -> Self {
        if !config.enabled {
            info!("Device registry disabled; data-plane projection is off");
            return Self {
                connection: None,
                config,
            };
        }

        let connection = match Client::open(config.redis_url.as_str()) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(connection) => {
                    info!("Device registry connected at {}", config.redis_url);
                    Some(connection)
                }
                Err(e) => {
                    warn!("Device registry unavailable, continuing without it: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Invalid registry URL, continuing without registry: {}", e);
                None
            }
        };

        Self { connection, config }
    }

    /// A registry that never talks to Redis (tests, registry-less deployments)
    pub fn disabled() -> Self {
        Self {
            connection: None,
            config: RegistryConfig::default(),
        }
    }

    fn device_key(&self, device_id: &str) -> String {
        format!("{}device:{}", self.config.key_prefix, device_id)
    }

    fn active_key(&self) -> String {
        format!("{}devices:active", self.config.key_prefix)
    }

    fn user_active_key(&self, user_id: &str) -> String {
        format!("{}user:{}:devices:active", self.config.key_prefix, user_id)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Write or refresh a device's static record
    pub async fn upsert(&self, device: &Device) {
        let record = RegistryDevice::from(device);
        if let Err(e) = self.try_upsert(&record).await {
            warn!(device_id = %device.id, "Registry upsert failed: {}", e);
        }
    }

    async fn try_upsert(&self, record: &RegistryDevice) -> VpnResult<()> {
        let Some(connection) = &self.connection else {
            debug!("Registry disabled, skipping upsert");
            return Ok(());
        };

        let json = serde_json::to_string(record)
            .map_err(|e| VpnError::Registry(format!("serialize device record: {}", e)))?;

        let mut conn = connection.clone();
        let key = self.device_key(&record.id);
        self.bounded(async move { conn.set::<_, _, ()>(&key, json).await })
            .await
    }

    /// Drop a device's record and its membership in both active sets
    pub async fn remove(&self, device_id: &str, user_id: &str) {
        if let Err(e) = self.try_remove(device_id, user_id).await {
            warn!(device_id, "Registry remove failed: {}", e);
        }
    }

    async fn try_remove(&self, device_id: &str, user_id: &str) -> VpnResult<()> {
        let Some(connection) = &self.connection else {
            return Ok(());
        };

        let mut conn = connection.clone();
        let device_key = self.device_key(device_id);
        let active_key = self.active_key();
        let user_key = self.user_active_key(user_id);
        let id = device_id.to_string();

        self.bounded(async move {
            conn.del::<_, ()>(&device_key).await?;
            conn.srem::<_, _, ()>(&active_key, &id).await?;
            conn.srem::<_, _, ()>(&user_key, &id).await
        })
        .await
    }

    /// Add devices to the global and per-user active sets
    pub async fn set_authorized(&self, user_id: &str, device_ids: &[String]) {
        if device_ids.is_empty() {
            return;
        }
        if let Err(e) = self.try_membership(user_id, device_ids, true).await {
            warn!(user_id, "Registry authorize failed: {}", e);
        }
    }

    /// Remove devices from the global and per-user active sets
    pub async fn set_unauthorized(&self, user_id: &str, device_ids: &[String]) {
        if device_ids.is_empty() {
            return;
        }
        if let Err(e) = self.try_membership(user_id, device_ids, false).await {
            warn!(user_id, "Registry deauthorize failed: {}", e);
        }
    }

    async fn try_membership(
        &self,
        user_id: &str,
        device_ids: &[String],
        add: bool,
    ) -> VpnResult<()> {
        let Some(connection) = &self.connection else {
            return Ok(());
        };

        let mut conn = connection.clone();
        let active_key = self.active_key();
        let user_key = self.user_active_key(user_id);
        let ids = device_ids.to_vec();

        self.bounded(async move {
            if add {
                conn.sadd::<_, _, ()>(&active_key, &ids).await?;
                conn.sadd::<_, _, ()>(&user_key, &ids).await
            } else {
                conn.srem::<_, _, ()>(&active_key, &ids).await?;
                conn.srem::<_, _, ()>(&user_key, &ids).await
            }
        })
        .await
    }

    /// Rebuild the projection purely from relational state.
    ///
    /// Diff-based on both the global set and every per-user set (including
    /// stale ones left over from deleted users), so it is idempotent and
    /// safe to run at any time, including after registry data loss.
    pub async fn rebuild_all(&self, db: &SqlitePool) -> VpnResult<()> {
        let Some(connection) = &self.connection else {
            debug!("Registry disabled, skipping rebuild");
            return Ok(());
        };

        let devices = sqlx::query_as::<_, Device>(
            "SELECT id, user_id, name, public_key, ipv4, ipv6, status, created_at FROM device",
        )
        .fetch_all(db)
        .await?;

        let mut desired_global: HashSet<String> = HashSet::new();
        let mut desired_per_user: HashMap<String, HashSet<String>> = HashMap::new();

        for device in &devices {
            self.upsert(device).await;
            if device.status == crate::db::models::DeviceStatus::Active {
                desired_global.insert(device.id.clone());
                desired_per_user
                    .entry(device.user_id.clone())
                    .or_default()
                    .insert(device.id.clone());
            }
        }

        if let Err(e) = self
            .reconcile_sets(connection.clone(), desired_global, desired_per_user)
            .await
        {
            warn!("Registry rebuild did not fully converge: {}", e);
        } else {
            info!("Registry rebuilt from relational state ({} devices)", devices.len());
        }

        Ok(())
    }

    async fn reconcile_sets(
        &self,
        conn: ConnectionManager,
        desired_global: HashSet<String>,
        desired_per_user: HashMap<String, HashSet<String>>,
    ) -> VpnResult<()> {
        let active_key = self.active_key();

        let current_global: Vec<String> = self
            .bounded({
                let mut conn = conn.clone();
                let key = active_key.clone();
                async move { conn.smembers(&key).await }
            })
            .await?;
        let current_global: HashSet<String> = current_global.into_iter().collect();

        for id in desired_global.difference(&current_global) {
            let key = active_key.clone();
            let id = id.clone();
            let mut conn = conn.clone();
            self.bounded(async move { conn.sadd::<_, _, ()>(&key, &id).await })
                .await?;
        }
        for id in current_global.difference(&desired_global) {
            let key = active_key.clone();
            let id = id.clone();
            let mut conn = conn.clone();
            self.bounded(async move { conn.srem::<_, _, ()>(&key, &id).await })
                .await?;
        }

        // Per-user sets: reconcile both the users we know and any stale set
        // keys left behind in the store
        let pattern = format!("{}user:*:devices:active", self.config.key_prefix);
        let existing_keys: Vec<String> = self
            .bounded({
                let mut conn = conn.clone();
                async move { conn.keys(&pattern).await }
            })
            .await?;

        let mut user_keys: HashSet<String> = existing_keys.into_iter().collect();
        for user_id in desired_per_user.keys() {
            user_keys.insert(self.user_active_key(user_id));
        }

        for key in user_keys {
            let user_id = key
                .strip_prefix(&format!("{}user:", self.config.key_prefix))
                .and_then(|rest| rest.strip_suffix(":devices:active"))
                .unwrap_or_default()
                .to_string();
            let desired = desired_per_user.get(&user_id).cloned().unwrap_or_default();

            let current: Vec<String> = self
                .bounded({
                    let mut conn = conn.clone();
                    let key = key.clone();
                    async move { conn.smembers(&key).await }
                })
                .await?;
            let current: HashSet<String> = current.into_iter().collect();

            for id in desired.difference(&current) {
                let key = key.clone();
                let id = id.clone();
                let mut conn = conn.clone();
                self.bounded(async move { conn.sadd::<_, _, ()>(&key, &id).await })
                    .await?;
            }
            for id in current.difference(&desired) {
                let key = key.clone();
                let id = id.clone();
                let mut conn = conn.clone();
                self.bounded(async move { conn.srem::<_, _, ()>(&key, &id).await })
                    .await?;
            }
        }

        Ok(())
    }

    /// Run a Redis operation under the configured timeout; the registry
    /// must never stall a caller on a slow external store
    async fn bounded<T>(
        &self,
        op: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> VpnResult<T> {
        match tokio::time::timeout(self.timeout(), op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(VpnError::Registry(e.to_string())),
            Err(_) => Err(VpnError::Registry("operation timed out".to_string())),
        }
    }
}

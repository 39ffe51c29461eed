/// Device endpoints
use crate::{
    auth::AuthContext,
    context::AppContext,
    db::models::Device,
    device::RegisterDeviceRequest,
    error::VpnResult,
};
use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices", post(register_device))
        .route("/devices/:id", delete(remove_device))
        .route("/devices/:id/key", post(rotate_key))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub id: String,
    pub name: String,
    pub public_key: String,
    pub ipv4: String,
    pub ipv6: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Device> for DeviceResponse {
    fn from(device: Device) -> Self {
        Self {
            id: device.id,
            name: device.name,
            public_key: device.public_key,
            ipv4: device.ipv4,
            ipv6: device.ipv6,
            status: match device.status {
                crate::db::models::DeviceStatus::Active => "active".to_string(),
                crate::db::models::DeviceStatus::Inactive => "inactive".to_string(),
            },
            created_at: device.created_at,
        }
    }
}

async fn list_devices(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> VpnResult<Json<Vec<DeviceResponse>>> {
    let devices = ctx.devices.list_devices(&auth.user_id).await?;
    Ok(Json(devices.into_iter().map(DeviceResponse::from).collect()))
}

async fn register_device(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<RegisterDeviceRequest>,
) -> VpnResult<Json<DeviceResponse>> {
    let user = ctx.accounts.get_user(&auth.user_id).await?;
    let device = ctx.devices.register(&user, req).await?;
    Ok(Json(device.into()))
}

async fn remove_device(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(device_id): Path<String>,
) -> VpnResult<Json<serde_json::Value>> {
    ctx.devices.remove(&auth.user_id, &device_id).await?;
    Ok(Json(serde_json::json!({ "removed": true })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RotateKeyRequest {
    pub public_key: String,
}

/// Replace a device's public key; addresses are re-derived alongside it
async fn rotate_key(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(device_id): Path<String>,
    Json(req): Json<RotateKeyRequest>,
) -> VpnResult<Json<DeviceResponse>> {
    let device = ctx
        .devices
        .rotate_key(&auth.user_id, &device_id, &req.public_key)
        .await?;
    Ok(Json(device.into()))
}

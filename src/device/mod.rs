/// Device identity and lifecycle
///
/// Each registered device gets a deterministic, collision-checked virtual
/// network address pair derived from stable inputs, and its authorization
/// status is mirrored into the data-plane registry.

pub mod allocator;
mod manager;

pub use manager::DeviceManager;

use serde::{Deserialize, Serialize};

/// Device registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    pub name: Option<String>,
    pub public_key: String,
}

/// Configuration management for the access control plane
use crate::error::{VpnError, VpnResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub devices: DeviceConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub db_location: PathBuf,
}

/// Authentication and token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,
    /// Refresh token lifetime in days
    pub refresh_token_ttl_days: i64,
    /// Maximum live refresh tokens per user
    pub refresh_token_limit: i64,
    /// Argon2id time cost (iterations)
    pub argon2_time_cost: u32,
    /// Argon2id memory cost in KiB
    pub argon2_memory_kib: u32,
    /// Ed25519 signing key, base64-encoded PKCS#8. Mandatory in production;
    /// non-production falls back to an ephemeral keypair.
    pub signing_key: Option<String>,
    /// Production mode refuses to start without externally supplied key material
    pub production: bool,
}

/// Device identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device limit applied when the user has no current subscription plan
    pub default_device_limit: i64,
}

/// Data-plane registry (Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Enable the external registry projection
    pub enabled: bool,
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub redis_url: String,
    /// Key prefix for all registry entries
    pub key_prefix: String,
    /// Per-operation timeout in seconds; registry writes never block callers
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "tunnelward:".to_string(),
            timeout_secs: 2,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> VpnResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("TW_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("TW_PORT")
            .unwrap_or_else(|_| "8420".to_string())
            .parse()
            .map_err(|_| VpnError::Validation("Invalid port number".to_string()))?;
        let version = env::var("TW_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("TW_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let db_location = env::var("TW_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("tunnelward.sqlite"));

        let access_token_ttl_secs = env::var("TW_ACCESS_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86400);
        let refresh_token_ttl_days = env::var("TW_REFRESH_TOKEN_TTL_DAYS")
            .unwrap_or_else(|_| "45".to_string())
            .parse()
            .unwrap_or(45);
        let refresh_token_limit = env::var("TW_REFRESH_TOKEN_LIMIT")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let argon2_time_cost = env::var("TW_ARGON2_TIME_COST")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);
        let argon2_memory_kib = env::var("TW_ARGON2_MEMORY_KIB")
            .unwrap_or_else(|_| "65536".to_string())
            .parse()
            .unwrap_or(65536);

        let production = env::var("TW_PRODUCTION")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let signing_key = env::var("TW_SIGNING_KEY").ok();

        let default_device_limit = env::var("TW_DEFAULT_DEVICE_LIMIT")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        let registry_enabled = env::var("TW_REGISTRY_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let key_prefix =
            env::var("TW_REGISTRY_KEY_PREFIX").unwrap_or_else(|_| "tunnelward:".to_string());
        let registry_timeout_secs = env::var("TW_REGISTRY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .unwrap_or(2);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                db_location,
            },
            auth: AuthConfig {
                access_token_ttl_secs,
                refresh_token_ttl_days,
                refresh_token_limit,
                argon2_time_cost,
                argon2_memory_kib,
                signing_key,
                production,
            },
            devices: DeviceConfig {
                default_device_limit,
            },
            registry: RegistryConfig {
                enabled: registry_enabled,
                redis_url,
                key_prefix,
                timeout_secs: registry_timeout_secs,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> VpnResult<()> {
        if self.service.hostname.is_empty() {
            return Err(VpnError::Validation("Hostname cannot be empty".to_string()));
        }

        // Production never generates key material at runtime
        if self.auth.production && self.auth.signing_key.is_none() {
            return Err(VpnError::Validation(
                "TW_SIGNING_KEY is required in production".to_string(),
            ));
        }

        if self.auth.refresh_token_limit < 1 {
            return Err(VpnError::Validation(
                "Refresh token limit must be at least 1".to_string(),
            ));
        }

        if self.auth.argon2_memory_kib < 8 * self.auth.argon2_time_cost.max(1) {
            return Err(VpnError::Validation(
                "Argon2 memory cost too low for the configured time cost".to_string(),
            ));
        }

        Ok(())
    }
}

/// Shared application context
///
/// Built once at startup and handed to the router and the job scheduler.
/// Every service is cheap to clone and shares the same pool and config.
use crate::{
    account::AccountManager,
    config::ServerConfig,
    credential::CredentialService,
    db::{self, DatabaseOptions},
    device::DeviceManager,
    error::VpnResult,
    registry::DeviceRegistry,
    token::{AccessTokenService, RefreshTokenService, TokenKeys},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub credentials: CredentialService,
    pub access_tokens: AccessTokenService,
    pub refresh_tokens: RefreshTokenService,
    pub accounts: AccountManager,
    pub devices: DeviceManager,
    pub registry: DeviceRegistry,
}

impl AppContext {
    /// Open storage, run migrations, connect the registry and wire up all
    /// services
    pub async fn new(config: ServerConfig) -> VpnResult<Self> {
        let config = Arc::new(config);

        let db = db::create_pool(&config.storage.db_location, DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;
        info!("Database ready at {}", config.storage.db_location.display());

        let registry = DeviceRegistry::connect(config.registry.clone()).await;

        let keys = TokenKeys::from_config(&config.auth)?;
        let access_tokens =
            AccessTokenService::new(db.clone(), keys, config.auth.access_token_ttl_secs);
        let refresh_tokens = RefreshTokenService::new(db.clone(), config.clone());
        let credentials = CredentialService::new(db.clone(), config.clone());
        let devices = DeviceManager::new(db.clone(), config.clone(), registry.clone());
        let accounts = AccountManager::new(db.clone(), config.clone(), devices.clone());

        Ok(Self {
            config,
            db,
            credentials,
            access_tokens,
            refresh_tokens,
            accounts,
            devices,
            registry,
        })
    }
}

/// End-to-end access control flows against a real (temporary) database,
/// wired through the same context the server uses. Registry stays
/// disabled so everything here is self-contained.
use chrono::{Duration, Utc};
use tempfile::TempDir;
use tunnelward::{
    account::CreateAccountRequest,
    config::{
        AuthConfig, DeviceConfig, LoggingConfig, RegistryConfig, ServerConfig, ServiceConfig,
        StorageConfig,
    },
    context::AppContext,
    db::models::DeviceStatus,
    device::RegisterDeviceRequest,
    jobs::tasks,
};
use uuid::Uuid;

fn test_server_config(dir: &TempDir) -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 0,
            version: "test".to_string(),
        },
        storage: StorageConfig {
            data_directory: dir.path().to_path_buf(),
            db_location: dir.path().join("test.sqlite"),
        },
        auth: AuthConfig {
            access_token_ttl_secs: 86400,
            refresh_token_ttl_days: 45,
            refresh_token_limit: 5,
            argon2_time_cost: 1,
            argon2_memory_kib: 1024,
            signing_key: None,
            production: false,
        },
        devices: DeviceConfig {
            default_device_limit: 3,
        },
        registry: RegistryConfig::default(),
        logging: LoggingConfig {
            level: "info".to_string(),
        },
    }
}

async fn test_context() -> (AppContext, TempDir) {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::new(test_server_config(&dir)).await.unwrap();
    (ctx, dir)
}

async fn grant_subscription(ctx: &AppContext, user_id: &str, device_limit: i64, days: i64) {
    sqlx::query("INSERT OR IGNORE INTO plan (id, name, device_limit) VALUES ('plan-1', 'Plan', ?1)")
        .bind(device_limit)
        .execute(&ctx.db)
        .await
        .unwrap();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO subscription (id, user_id, plan_id, status, started_at, expires_at)
         VALUES (?1, ?2, 'plan-1', 'active', ?3, ?4)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(now)
    .bind(now + Duration::days(days))
    .execute(&ctx.db)
    .await
    .unwrap();
}

#[tokio::test]
async fn full_access_lifecycle() {
    let (ctx, _dir) = test_context().await;

    // Anonymous signup: passphrase and recovery code come back exactly once
    let created = ctx
        .accounts
        .create_account(CreateAccountRequest {
            email: None,
            factor: None,
        })
        .await
        .unwrap();
    let user_id = created.user.id.clone();
    assert!(created.credential.passphrase.split('-').count() >= 7);

    // Without a subscription, login verifies but no tokens are minted
    let user = ctx
        .credentials
        .authenticate(&created.credential.passphrase, None)
        .await
        .expect("credential should verify");
    assert!(ctx.access_tokens.issue(&user).await.unwrap().is_none());

    grant_subscription(&ctx, &user_id, 2, 30).await;

    // Now a full token pair is issued
    let access = ctx.access_tokens.issue(&user).await.unwrap().unwrap();
    let refresh = ctx
        .refresh_tokens
        .issue(&user, Some("laptop"))
        .await
        .unwrap()
        .unwrap();

    let claims = ctx.access_tokens.verify(&access).unwrap();
    assert_eq!(claims.sub, user_id);
    assert!(claims.sub_exp > Utc::now().timestamp());

    // Devices come up active with derived addresses
    let device = ctx
        .devices
        .register(
            &user,
            RegisterDeviceRequest {
                name: None,
                public_key: "wg-pk-1".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(device.status, DeviceStatus::Active);
    assert!(device.ipv4.starts_with("10."));

    // Refresh rotates: the new value works, the old one is burned
    let (_, rotated) = ctx.refresh_tokens.exchange(&refresh).await.unwrap().unwrap();
    assert!(ctx.refresh_tokens.exchange(&refresh).await.unwrap().is_none());

    // Subscription lapses; the sweep revokes sessions and deauthorizes devices
    sqlx::query("UPDATE subscription SET expires_at = ?1")
        .bind(Utc::now() - Duration::seconds(1))
        .execute(&ctx.db)
        .await
        .unwrap();
    let swept = tasks::sweep_lapsed_subscriptions(&ctx).await.unwrap();
    assert_eq!(swept, 1);

    assert!(ctx.refresh_tokens.exchange(&rotated).await.unwrap().is_none());
    let devices = ctx.devices.list_devices(&user_id).await.unwrap();
    assert!(devices.iter().all(|d| d.status == DeviceStatus::Inactive));

    // The signed access token stays verifiable until it expires on its own
    assert!(ctx.access_tokens.verify(&access).is_some());

    // Renewal brings the oldest devices back
    grant_subscription(&ctx, &user_id, 2, 30).await;
    ctx.devices.reconcile_user(&user_id).await.unwrap();
    let devices = ctx.devices.list_devices(&user_id).await.unwrap();
    assert!(devices.iter().all(|d| d.status == DeviceStatus::Active));
}

#[tokio::test]
async fn recovery_rotates_credential_and_kills_sessions() {
    let (ctx, _dir) = test_context().await;

    let created = ctx
        .accounts
        .create_account(CreateAccountRequest {
            email: Some("user@example.com".to_string()),
            factor: None,
        })
        .await
        .unwrap();
    let user_id = created.user.id.clone();
    grant_subscription(&ctx, &user_id, 2, 30).await;

    let user = ctx
        .credentials
        .authenticate(&created.credential.passphrase, Some("user@example.com"))
        .await
        .unwrap();
    let refresh = ctx
        .refresh_tokens
        .issue(&user, None)
        .await
        .unwrap()
        .unwrap();

    let reissued = ctx
        .accounts
        .recover_credential(&user_id, &created.credential.recovery_code, None)
        .await
        .unwrap();

    // Old passphrase and old sessions are dead, the new passphrase works
    assert!(ctx
        .credentials
        .authenticate(&created.credential.passphrase, None)
        .await
        .is_none());
    assert!(ctx.refresh_tokens.exchange(&refresh).await.unwrap().is_none());
    assert!(ctx
        .credentials
        .authenticate(&reissued.passphrase, None)
        .await
        .is_some());
}

#[tokio::test]
async fn second_factor_is_part_of_the_identifier() {
    let (ctx, _dir) = test_context().await;

    let created = ctx
        .accounts
        .create_account(CreateAccountRequest {
            email: None,
            factor: Some("hunter2".to_string()),
        })
        .await
        .unwrap();

    // Passphrase alone is not enough
    assert!(ctx
        .credentials
        .authenticate(&created.credential.passphrase, None)
        .await
        .is_none());

    let full = format!("{}:{}", created.credential.passphrase, "hunter2");
    assert!(ctx.credentials.authenticate(&full, None).await.is_some());
}

#[tokio::test]
async fn device_limit_and_address_stability() {
    let (ctx, _dir) = test_context().await;

    let created = ctx
        .accounts
        .create_account(CreateAccountRequest {
            email: None,
            factor: None,
        })
        .await
        .unwrap();
    let user = created.user;
    grant_subscription(&ctx, &user.id, 1, 30).await;

    let device = ctx
        .devices
        .register(
            &user,
            RegisterDeviceRequest {
                name: Some("laptop".to_string()),
                public_key: "pk-a".to_string(),
            },
        )
        .await
        .unwrap();

    // Plan limit of one device
    let over = ctx
        .devices
        .register(
            &user,
            RegisterDeviceRequest {
                name: None,
                public_key: "pk-b".to_string(),
            },
        )
        .await;
    assert!(over.is_err());

    // Addresses survive restarts: a fresh context over the same database
    // sees the same stored addresses for the same identity tuple
    let listed = ctx.devices.list_devices(&user.id).await.unwrap();
    assert_eq!(listed[0].ipv4, device.ipv4);
    assert_eq!(listed[0].ipv6, device.ipv6);
}

#[tokio::test]
async fn account_deletion_cascades() {
    let (ctx, _dir) = test_context().await;

    let created = ctx
        .accounts
        .create_account(CreateAccountRequest {
            email: None,
            factor: None,
        })
        .await
        .unwrap();
    let user = created.user.clone();
    grant_subscription(&ctx, &user.id, 2, 30).await;

    ctx.devices
        .register(
            &user,
            RegisterDeviceRequest {
                name: None,
                public_key: "pk-a".to_string(),
            },
        )
        .await
        .unwrap();
    let refresh = ctx
        .refresh_tokens
        .issue(&user, None)
        .await
        .unwrap()
        .unwrap();

    ctx.accounts.delete_account(&user.id).await.unwrap();

    assert!(ctx
        .credentials
        .authenticate(&created.credential.passphrase, None)
        .await
        .is_none());
    assert!(ctx.refresh_tokens.exchange(&refresh).await.unwrap().is_none());
    assert!(ctx.devices.list_devices(&user.id).await.unwrap().is_empty());
    assert!(ctx.accounts.get_user(&user.id).await.is_err());
}

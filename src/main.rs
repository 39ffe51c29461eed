use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunnelward::{config::ServerConfig, context::AppContext, error::VpnResult, jobs, server};

#[tokio::main]
async fn main() -> VpnResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnelward=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    let config = ServerConfig::from_env()?;
    config.validate()?;

    let ctx = Arc::new(AppContext::new(config).await?);

    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
 _                          _                          _
| |_ _   _ _ __  _ __   ___| |_      ____ _ _ __ __| |
| __| | | | '_ \| '_ \ / _ \ \ \ /\ / / _` | '__/ _` |
| |_| |_| | | | | | | |  __/ |\ V  V / (_| | | | (_| |
 \__|\__,_|_| |_|_| |_|\___|_| \_/\_/ \__,_|_|  \__,_|

        VPN Access Control Plane v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}

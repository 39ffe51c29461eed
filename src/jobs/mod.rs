use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::subscription_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::refresh_token_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::registry_rebuild_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Expire lapsed subscriptions and revoke what they granted (every 5 minutes)
    async fn subscription_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            match tasks::sweep_lapsed_subscriptions(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Subscription sweep: {} users lost access", count);
                    }
                }
                Err(e) => error!("Subscription sweep failed: {}", e),
            }
        }
    }

    /// Delete expired refresh token records (runs every hour)
    async fn refresh_token_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;

            match tasks::cleanup_expired_refresh_tokens(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired refresh tokens", count);
                    }
                }
                Err(e) => error!("Refresh token cleanup failed: {}", e),
            }
        }
    }

    /// Re-converge the data-plane registry with relational state (runs daily)
    async fn registry_rebuild_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(86400));

        loop {
            interval.tick().await;
            info!("Running registry rebuild");

            if let Err(e) = tasks::rebuild_registry(&scheduler.context).await {
                error!("Registry rebuild failed: {}", e);
            }
        }
    }

    /// Health check (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if let Err(e) = tasks::health_check(&scheduler.context).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}

/// API routes and handlers
pub mod accounts;
pub mod devices;
pub mod health;
pub mod middleware;
pub mod session;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(accounts::routes())
        .merge(session::routes())
        .merge(devices::routes())
}

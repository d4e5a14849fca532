use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod health;
pub mod pg_tenant_payments;
pub mod webhooks;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(pg_tenant_payments::router())
        .merge(webhooks::router())
}

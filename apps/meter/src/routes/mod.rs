pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;
use crate::subscription::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/plans", get(handlers::handle_list_plans))
        .route("/api/v1/accounts", post(handlers::handle_create_account))
        .route("/api/v1/usage", get(handlers::handle_get_usage))
        .route("/api/v1/usage/check", get(handlers::handle_check))
        .route("/api/v1/usage/increment", post(handlers::handle_increment))
        .route("/api/v1/usage/reset", post(handlers::handle_reset))
        .route("/api/v1/subscription", put(handlers::handle_update_plan))
        .with_state(state)
}

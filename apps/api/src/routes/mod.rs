pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::errors::AppError;
use crate::formation::handlers;
use crate::state::AppState;

async fn not_found() -> AppError {
    AppError::NotFound("No route matches this path".to_string())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Team Formation API
        .route("/api/v1/teams/form", post(handlers::handle_form_team))
        .route("/api/v1/teams/quality", post(handlers::handle_team_quality))
        .fallback(not_found)
        .with_state(state)
}

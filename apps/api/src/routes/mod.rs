pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::proposal::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(health::root_handler))
        .route("/health", get(health::health_handler))
        .route("/process_rfp/", post(handlers::handle_process_rfp))
        .route("/process_rfp", post(handlers::handle_process_rfp))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

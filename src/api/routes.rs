//! API route table
//!
//! - /health                     service and pipeline status
//! - /analyze, /analyze/batch    multipart uploads
//! - /wafers, /wafers/:id        persisted history
//! - /spc, /rca, /copilot        analytics over history
//! - /notifications/*            alert settings and test delivery

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::state::ApiState;

/// Build the v1 API router. `max_upload_bytes` caps a whole request body.
pub fn api_routes(state: ApiState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/analyze", post(handlers::analyze))
        .route("/analyze/batch", post(handlers::analyze_batch))
        .route("/wafers", get(handlers::list_wafers))
        .route("/wafers/:id", get(handlers::get_wafer))
        .route("/spc", get(handlers::spc))
        .route("/rca", get(handlers::rca))
        .route("/copilot", post(handlers::copilot))
        .route(
            "/notifications/config",
            get(handlers::get_notification_config).put(handlers::put_notification_config),
        )
        .route("/notifications/test", post(handlers::test_notification))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

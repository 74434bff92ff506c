//! REST API module using Axum
//!
//! All endpoints live under `/api/v1` and answer with the JSON envelope from
//! [`envelope`]. Request tracing and gzip compression wrap every route.

pub mod envelope;
pub mod handlers;
mod routes;
mod state;

pub use state::ApiState;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

/// Environment override for allowed origins (comma-separated).
pub const CORS_ENV_VAR: &str = "WAFER_CORS_ORIGINS";

/// Build the CORS layer from `WAFER_CORS_ORIGINS`, else the configured list.
/// No origins at all means any origin is allowed.
fn build_cors_layer(configured: &[String]) -> CorsLayer {
    let origins: Vec<String> = match std::env::var(CORS_ENV_VAR) {
        Ok(raw) => raw.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect(),
        Err(_) => configured.to_vec(),
    };
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.is_empty() {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    tracing::info!(origins = ?origins, "CORS: allowing configured origins");
    base.allow_origin(allowed)
}

/// Create the complete application router.
pub fn create_app(state: ApiState, server: &ServerConfig) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state, server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&server.cors_origins))
}

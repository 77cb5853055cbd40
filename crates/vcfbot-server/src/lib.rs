//! VCF bot server library - HTTP boundary over the session manager.
//!
//! The router lives here rather than in main.rs so integration tests can drive it.

pub mod config;
pub mod logging;
pub mod routes;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/pairing-code", post(routes::pairing::request_code))
        .route("/send-message", post(routes::messages::send))
        .route("/status", get(routes::status))
        .route("/health", get(routes::health))
        .route("/test", get(routes::test))
        .fallback_service(ServeDir::new(static_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

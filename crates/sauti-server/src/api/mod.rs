//! API routes and handlers

mod devices;
mod generate;
mod health;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Streaming generation
        .route("/generate", post(generate::generate))
        .route("/stop", post(generate::stop))
        // Device pool
        .route("/devices", get(devices::list_devices))
        .route("/devices/summary", get(devices::summary))
        .route("/devices/:id", get(devices::get_device));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

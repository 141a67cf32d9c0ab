pub mod rest;
pub mod ws;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use waitwatch_sync::{ChannelBroadcaster, Services};

pub struct AppState {
    pub services: Services,
    /// Same channel the ingestor publishes into; `/ws` subscribes here.
    pub events: ChannelBroadcaster,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // REST API
        .route("/api/facilities", get(rest::api_facilities))
        .route("/api/observations/{label}", post(rest::api_observations))
        .route("/api/sync", post(rest::api_sync))
        // Push surface
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // method + path + status + latency only
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

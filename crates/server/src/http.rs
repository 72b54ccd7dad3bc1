//! The HTTP surface: health/readiness, Prometheus metrics, and the WebSocket
//! upgrade route.

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::websocket::WebSocketHandler;

/// `metrics_handle` is installed once in `main` (the Prometheus recorder can
/// only be installed globally once per process) and threaded in here.
pub fn create_router(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let settings = state.current_settings();
    let cors_layer = build_cors_layer(&settings.server.cors_origins, settings.server.cors_enabled);
    let ws_path = settings.server.ws_path.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/metrics",
            get({
                let handle = metrics_handle.clone();
                move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }
            }),
        )
        .route(&ws_path, get(WebSocketHandler::handle))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS from configured origins rather than a wildcard, matching the
/// teacher's stance on not defaulting to permissive CORS in production.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    if origins.is_empty() {
        tracing::info!("no CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin, "invalid CORS origin");
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::error!("all configured CORS origins are invalid, falling back to localhost");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_credentials(true)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") })))
}

/// Readiness additionally reports active session count and the configured
/// connection ceiling, so a load balancer can back off before `max_connections`
/// starts rejecting new sockets.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.current_settings();
    let active = state.sessions.count();
    let ready = active < settings.server.max_connections;
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "active_sessions": active,
            "max_connections": settings.server.max_connections,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voxkey_config::Settings;
    use voxkey_core::traits::fakes::{
        AlwaysSpeechVad, DeterministicExtractor, InMemoryGalleryStore, PlantedAsr, RawPcmDecoder,
    };

    #[test]
    fn router_builds_from_default_settings() {
        let state = AppState::new(
            Settings::default(),
            Arc::new(RawPcmDecoder),
            Arc::new(AlwaysSpeechVad),
            Arc::new(PlantedAsr::new("4326")),
            Arc::new(DeterministicExtractor::new(192)),
            Arc::new(InMemoryGalleryStore::default()),
        );
        let _ = create_router(state, crate::metrics::init_metrics());
    }
}

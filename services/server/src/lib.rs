pub mod db;
pub mod fanout;
pub mod feedback;
pub mod http;
pub mod processor;
pub mod registry;
pub mod repo;
pub mod state;

pub use state::AppState;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Assemble the HTTP surface. `cors_origins` is the allow-list; empty
/// means permissive (development default).
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let cors = build_cors(cors_origins);

    Router::new()
        .route("/healthz", get(http::status::healthz))
        .route("/api/v1/ping", get(http::status::ping))
        .route("/api/v1/status", get(http::status::status))
        .route("/api/v1/ingest", post(http::ingest::ingest))
        .route("/api/v1/stream", get(http::stream::stream_signals))
        .route("/api/v1/signals", get(http::signals::query_signals))
        .route("/api/v1/signals/recent", get(http::signals::recent_signals))
        .route(
            "/api/v1/sessions",
            get(http::sessions::list_sessions).post(http::sessions::create_session),
        )
        .route(
            "/api/v1/sessions/:session_id",
            get(http::sessions::get_session).patch(http::sessions::update_session),
        )
        .route(
            "/api/v1/sessions/:session_id/end",
            post(http::sessions::end_session),
        )
        .route(
            "/api/v1/devices",
            get(http::devices::list_devices).post(http::devices::create_device),
        )
        .route(
            "/api/v1/devices/:device_id",
            get(http::devices::get_device).patch(http::devices::update_device),
        )
        .route(
            "/api/v1/devices/:device_id/sessions",
            get(http::devices::get_device_sessions),
        )
        .route(
            "/api/v1/techniques",
            get(http::techniques::list_techniques).post(http::techniques::create_technique),
        )
        .route(
            "/api/v1/techniques/public",
            get(http::techniques::list_public_techniques),
        )
        .route(
            "/api/v1/techniques/:name",
            get(http::techniques::get_technique).delete(http::techniques::delete_technique),
        )
        .route(
            "/api/v1/param_versions",
            get(http::param_sets::list_param_versions).post(http::param_sets::create_param_set),
        )
        .route(
            "/api/v1/param_versions/:version",
            get(http::param_sets::get_param_set).patch(http::param_sets::update_param_set),
        )
        .route(
            "/api/v1/feedback/rules",
            get(http::feedback_rules::get_rules).post(http::feedback_rules::update_rules),
        )
        .route(
            "/api/v1/feedback/rules/settings",
            get(http::feedback_rules::get_settings),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect();
    if parsed.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;

/// GET /healthz — liveness only, no dependencies touched.
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /api/v1/ping — connectivity probe used for offline detection.
pub async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "pong": true }))
}

/// GET /api/v1/status — readiness: storage ping plus server version.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "connected",
        Err(_) => "error",
    };
    Json(serde_json::json!({
        "status": "ok",
        "database": database,
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

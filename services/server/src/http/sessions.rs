//! Session management endpoints.

use adem_core::{Session, SessionStatus, DEFAULT_PARAM_VERSION};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::response::{conflict, internal_error, not_found};
use crate::repo;
use crate::state::AppState;

fn session_json(session: &Session) -> serde_json::Value {
    let mut json = serde_json::to_value(session).unwrap_or_else(|_| serde_json::json!({}));
    json["duration_seconds"] = match session.duration_seconds() {
        Some(secs) => serde_json::json!(secs),
        None => serde_json::Value::Null,
    };
    json
}

#[derive(Debug, Deserialize)]
pub struct SessionCreate {
    pub device_id: String,
    pub technique_name: Option<String>,
    pub param_version: Option<String>,
    pub target_rr: Option<f64>,
}

/// POST /api/v1/sessions — explicit session start. The device is created
/// when it has never been observed (e.g. a client paired over BLE without
/// ever syncing). 409 when an active session already exists.
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<SessionCreate>,
) -> Response {
    if let Err(e) = repo::devices::ensure(&state.pool, &body.device_id).await {
        return internal_error(e);
    }

    let handle = state.sessions.get(&body.device_id).await;
    let _guard = handle.lock().await;

    match repo::sessions::find_active(&state.pool, &body.device_id).await {
        Ok(Some(_)) => {
            return conflict(format!(
                "Device {} already has an active session",
                body.device_id
            ))
        }
        Ok(None) => {}
        Err(e) => return internal_error(e),
    }

    let mut session = Session::new(
        body.device_id.clone(),
        body.technique_name.clone(),
        body.target_rr,
        Utc::now(),
    );
    session.param_version = body
        .param_version
        .unwrap_or_else(|| DEFAULT_PARAM_VERSION.to_owned());

    match repo::sessions::insert(&state.pool, &session).await {
        Ok(()) => (StatusCode::CREATED, Json(session_json(&session))).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    match repo::sessions::find_by_id(&state.pool, session_id).await {
        Ok(Some(session)) => Json(session_json(&session)).into_response(),
        Ok(None) => not_found(format!("Session {session_id} not found")),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionUpdate {
    pub technique_name: Option<String>,
    pub param_version: Option<String>,
    pub target_rr: Option<f64>,
}

/// PATCH /api/v1/sessions/:session_id — partial update; absent fields are
/// left alone.
pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<SessionUpdate>,
) -> Response {
    match repo::sessions::update_fields(
        &state.pool,
        session_id,
        body.technique_name.as_deref(),
        body.param_version.as_deref(),
        body.target_rr,
    )
    .await
    {
        Ok(Some(session)) => Json(session_json(&session)).into_response(),
        Ok(None) => not_found(format!("Session {session_id} not found")),
        Err(e) => internal_error(e),
    }
}

/// POST /api/v1/sessions/:session_id/end — complete the session and drop
/// the device's buffered derivation state.
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    let session = match repo::sessions::find_by_id(&state.pool, session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return not_found(format!("Session {session_id} not found")),
        Err(e) => return internal_error(e),
    };

    let ended_at = Utc::now();
    if let Err(e) =
        repo::sessions::end(&state.pool, session_id, ended_at, SessionStatus::Completed).await
    {
        return internal_error(e);
    }
    state.sessions.clear_device(&session.device_id).await;

    match repo::sessions::find_by_id(&state.pool, session_id).await {
        Ok(Some(session)) => Json(session_json(&session)).into_response(),
        Ok(None) => not_found(format!("Session {session_id} not found")),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub skip: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /api/v1/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Response {
    let status = match query.status.as_deref().map(SessionStatus::parse) {
        Some(None) => {
            return super::response::bad_request("status must be active|completed|cancelled")
        }
        Some(Some(status)) => Some(status),
        None => None,
    };
    let filter = repo::sessions::SessionFilter {
        device_id: query.device_id.as_deref(),
        status,
        start_date: query.start_date,
        end_date: query.end_date,
        limit: query.limit.clamp(1, 1000),
        skip: query.skip.max(0),
    };
    match repo::sessions::list(&state.pool, &filter).await {
        Ok(sessions) => {
            let body: Vec<serde_json::Value> = sessions.iter().map(session_json).collect();
            Json(body).into_response()
        }
        Err(e) => internal_error(e),
    }
}

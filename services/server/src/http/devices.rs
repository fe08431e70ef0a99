//! Device management endpoints.

use adem_core::Device;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::response::{conflict, internal_error, not_found};
use crate::repo;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct Paging {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub skip: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /api/v1/devices
pub async fn list_devices(State(state): State<AppState>, Query(paging): Query<Paging>) -> Response {
    match repo::devices::list(&state.pool, paging.limit.clamp(1, 1000), paging.skip.max(0)).await {
        Ok(devices) => Json(devices).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/devices/:device_id
pub async fn get_device(State(state): State<AppState>, Path(device_id): Path<String>) -> Response {
    match repo::devices::find(&state.pool, &device_id).await {
        Ok(Some(device)) => Json(device).into_response(),
        Ok(None) => not_found(format!("Device {device_id} not found")),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceCreate {
    pub device_id: String,
    pub name: Option<String>,
    pub device_type: Option<String>,
}

/// POST /api/v1/devices — explicit registration; 409 on duplicates.
pub async fn create_device(
    State(state): State<AppState>,
    Json(body): Json<DeviceCreate>,
) -> Response {
    match repo::devices::find(&state.pool, &body.device_id).await {
        Ok(Some(_)) => return conflict(format!("Device {} already exists", body.device_id)),
        Ok(None) => {}
        Err(e) => return internal_error(e),
    }
    let device = Device::new(body.device_id, body.name, body.device_type);
    match repo::devices::insert(&state.pool, &device).await {
        Ok(()) => (StatusCode::CREATED, Json(device)).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub device_type: Option<String>,
}

/// PATCH /api/v1/devices/:device_id
pub async fn update_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<DeviceUpdate>,
) -> Response {
    match repo::devices::update(
        &state.pool,
        &device_id,
        body.name.as_deref(),
        body.device_type.as_deref(),
    )
    .await
    {
        Ok(Some(device)) => Json(device).into_response(),
        Ok(None) => not_found(format!("Device {device_id} not found")),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceSessionsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub skip: i64,
}

/// GET /api/v1/devices/:device_id/sessions
pub async fn get_device_sessions(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<DeviceSessionsQuery>,
) -> Response {
    match repo::devices::find(&state.pool, &device_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found(format!("Device {device_id} not found")),
        Err(e) => return internal_error(e),
    }
    let status = match query.status.as_deref().map(adem_core::SessionStatus::parse) {
        Some(None) => {
            return super::response::bad_request("status must be active|completed|cancelled")
        }
        Some(Some(status)) => Some(status),
        None => None,
    };
    let filter = repo::sessions::SessionFilter {
        device_id: Some(&device_id),
        status,
        start_date: None,
        end_date: None,
        limit: query.limit.clamp(1, 1000),
        skip: query.skip.max(0),
    };
    match repo::sessions::list(&state.pool, &filter).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => internal_error(e),
    }
}

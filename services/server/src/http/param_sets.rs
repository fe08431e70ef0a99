//! Parameter-set endpoints, keyed by version string.

use adem_core::ParameterSet;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::response::{conflict, internal_error, not_found};
use crate::repo;
use crate::state::AppState;

/// GET /api/v1/param_versions
pub async fn list_param_versions(State(state): State<AppState>) -> Response {
    match repo::param_sets::list_versions(&state.pool).await {
        Ok(versions) => Json(versions).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/param_versions/:version
pub async fn get_param_set(State(state): State<AppState>, Path(version): Path<String>) -> Response {
    match repo::param_sets::find(&state.pool, &version).await {
        Ok(Some(params)) => Json(params).into_response(),
        Ok(None) => not_found(format!("Parameter set {version} not found")),
        Err(e) => internal_error(e),
    }
}

/// POST /api/v1/param_versions — 409 when the version already exists.
pub async fn create_param_set(
    State(state): State<AppState>,
    Json(params): Json<ParameterSet>,
) -> Response {
    match repo::param_sets::find(&state.pool, &params.version).await {
        Ok(Some(_)) => {
            return conflict(format!("Parameter set {} already exists", params.version))
        }
        Ok(None) => {}
        Err(e) => return internal_error(e),
    }
    match repo::param_sets::insert(&state.pool, &params).await {
        Ok(()) => (StatusCode::CREATED, Json(params)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// PATCH /api/v1/param_versions/:version — full document replacement under
/// the path's version key.
pub async fn update_param_set(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Json(mut params): Json<ParameterSet>,
) -> Response {
    params.version = version.clone();
    match repo::param_sets::update(&state.pool, &params).await {
        Ok(true) => Json(params).into_response(),
        Ok(false) => not_found(format!("Parameter set {version} not found")),
        Err(e) => internal_error(e),
    }
}

//! Breathing-technique endpoints. The collection is keyed by name; the
//! list endpoints return a name → document map the clients index into.

use adem_core::Technique;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::response::{internal_error, not_found};
use crate::repo;
use crate::state::AppState;

fn by_name(techniques: Vec<Technique>) -> BTreeMap<String, Technique> {
    techniques
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect()
}

/// GET /api/v1/techniques — every non-deleted technique (admin view).
pub async fn list_techniques(State(state): State<AppState>) -> Response {
    match repo::techniques::list_active(&state.pool).await {
        Ok(techniques) => Json(by_name(techniques)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/techniques/public — the app-facing subset.
pub async fn list_public_techniques(State(state): State<AppState>) -> Response {
    match repo::techniques::list_public(&state.pool).await {
        Ok(techniques) => Json(by_name(techniques)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/techniques/:name
pub async fn get_technique(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match repo::techniques::find_active(&state.pool, &name).await {
        Ok(Some(technique)) => Json(technique).into_response(),
        Ok(None) => not_found(format!("Technique {name} not found")),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TechniqueCreate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub param_version: String,
    #[serde(default)]
    pub show_in_app: bool,
    #[serde(default)]
    pub protocol: Vec<[u32; 5]>,
}

/// POST /api/v1/techniques — create or update by name.
pub async fn create_technique(
    State(state): State<AppState>,
    Json(body): Json<TechniqueCreate>,
) -> Response {
    let technique = Technique {
        name: body.name,
        description: body.description,
        param_version: body.param_version,
        show_in_app: body.show_in_app,
        protocol: body.protocol,
        is_active: true,
    };
    match repo::techniques::upsert(&state.pool, &technique).await {
        Ok(()) => (StatusCode::CREATED, Json(technique)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// DELETE /api/v1/techniques/:name — soft delete.
pub async fn delete_technique(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match repo::techniques::soft_delete(&state.pool, &name).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found(format!("Technique {name} not found")),
        Err(e) => internal_error(e),
    }
}

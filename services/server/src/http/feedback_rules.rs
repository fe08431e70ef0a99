//! Feedback-rule endpoints over the singleton rules document.

use adem_core::FeedbackRules;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::response::internal_error;
use crate::repo;
use crate::state::AppState;

/// GET /api/v1/feedback/rules — creates the default document on first read.
pub async fn get_rules(State(state): State<AppState>) -> Response {
    match repo::feedback_rules::load(&state.pool).await {
        Ok(Some(stored)) => Json(serde_json::json!({
            "rules": stored.rules,
            "version": stored.version,
        }))
        .into_response(),
        Ok(None) => {
            let rules = FeedbackRules::default();
            match repo::feedback_rules::upsert(&state.pool, &rules).await {
                Ok(version) => Json(serde_json::json!({
                    "rules": rules,
                    "version": version,
                }))
                .into_response(),
                Err(e) => internal_error(e),
            }
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RulesUpdate {
    pub rules: FeedbackRules,
}

/// POST /api/v1/feedback/rules — replace the document, bumping its version.
pub async fn update_rules(
    State(state): State<AppState>,
    Json(body): Json<RulesUpdate>,
) -> Response {
    match repo::feedback_rules::upsert(&state.pool, &body.rules).await {
        Ok(version) => Json(serde_json::json!({
            "rules": body.rules,
            "version": version,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/feedback/rules/settings — just the timing knobs.
pub async fn get_settings(State(state): State<AppState>) -> Response {
    match repo::feedback_rules::load(&state.pool).await {
        Ok(Some(stored)) => Json(stored.rules.settings).into_response(),
        Ok(None) => Json(FeedbackRules::default().settings).into_response(),
        Err(e) => internal_error(e),
    }
}

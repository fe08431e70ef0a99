//! Signal query endpoints: filtered history and bounded recent backfill.

use adem_core::{SignalKind, SignalPayload};
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::response::{bad_request, internal_error};
use crate::repo::signals::{self, SignalFilter};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignalsQuery {
    pub device_id: Option<String>,
    pub session_id: Option<Uuid>,
    pub signal: Option<String>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub skip: i64,
}

fn default_limit() -> i64 {
    1000
}

/// GET /api/v1/signals
pub async fn query_signals(
    State(state): State<AppState>,
    Query(query): Query<SignalsQuery>,
) -> Response {
    let signal = match query.signal.as_deref().map(SignalKind::parse) {
        Some(None) => return bad_request("unknown signal type"),
        Some(Some(kind)) => Some(kind),
        None => None,
    };
    let filter = SignalFilter {
        device_id: query.device_id.as_deref(),
        session_id: query.session_id,
        signal,
        start_ts: query.start_ts,
        end_ts: query.end_ts,
        limit: query.limit.clamp(1, 10_000),
        skip: query.skip.max(0),
    };
    match signals::query(&state.pool, &filter).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_signal")]
    pub signal: String,
    pub device_id: Option<String>,
    #[serde(default = "default_recent_limit")]
    pub limit: i64,
}

fn default_recent_signal() -> String {
    "hr_derived".to_owned()
}

fn default_recent_limit() -> i64 {
    300
}

/// GET /api/v1/signals/recent — bounded backfill, oldest first. Heart-rate
/// records shrink to `{ts, bpm}` pairs for chart seeding.
pub async fn recent_signals(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let Some(kind) = SignalKind::parse(&query.signal) else {
        return bad_request("unknown signal type");
    };
    let limit = query.limit.clamp(1, 1000);
    let records = match signals::recent(&state.pool, kind, query.device_id.as_deref(), limit).await
    {
        Ok(records) => records,
        Err(e) => return internal_error(e),
    };

    let items: Vec<serde_json::Value> = records
        .iter()
        .rev()
        .map(|record| match &record.payload {
            SignalPayload::HrDerived(p) if kind == SignalKind::HrDerived => {
                serde_json::json!({ "ts": record.ts, "bpm": p.bpm })
            }
            _ => serde_json::to_value(record).unwrap_or_default(),
        })
        .collect();

    Json(serde_json::json!({
        "signal": kind.as_str(),
        "count": items.len(),
        "items": items,
    }))
    .into_response()
}

//! POST /api/v1/ingest — the write path of the pipeline.
//!
//! Accepts a single JSON object, a JSON array, or streamed NDJSON. Every
//! record is normalized, tied to the device's active session, persisted and
//! broadcast; `BreathTarget` records drive the session lifecycle, and `ecg`
//! records schedule a background derivation. Lifecycle transitions for one
//! device are serialized on its session mutex, so racing requests cannot
//! create two active sessions.
//!
//! NDJSON is parsed incrementally off the body stream: lines split on
//! `\n`, blank lines skipped, a trailing fragment without a final newline
//! parsed at end-of-stream. A malformed line is logged and skipped; the
//! rest of the batch continues.

use adem_core::{now_epoch_ms, RecordIngest, Session, SessionStatus, SignalKind, SignalPayload};
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::response::{bad_request, internal_error};
use crate::fanout::UNKNOWN_DEVICE;
use crate::feedback::FeedbackState;
use crate::processor::process_ecg;
use crate::registry::EcgBlock;
use crate::repo;
use crate::state::AppState;

/// Upper bound for non-streamed bodies.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub session_id: Option<Uuid>,
}

enum IngestFailure {
    /// Unparseable or semantically invalid record.
    Malformed(String),
    /// Storage failed; the request must surface a 500.
    Storage(sqlx::Error),
}

pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let ctype = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut accepted = 0usize;
    let mut active_session: Option<Uuid> = None;

    if ctype.contains("application/x-ndjson") {
        let mut stream = body.into_data_stream();
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let chunk = match stream.next().await {
                Some(Ok(chunk)) => Some(chunk),
                Some(Err(e)) => return bad_request(format!("body read failed: {e}")),
                None => None,
            };
            match chunk {
                Some(chunk) => {
                    buf.extend_from_slice(&chunk);
                    loop {
                        let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
                            break;
                        };
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        let line = trim_ascii(&line[..line.len() - 1]);
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(failure) =
                            ingest_line(&state, line, &mut accepted, &mut active_session).await
                        {
                            match failure {
                                IngestFailure::Malformed(e) => {
                                    warn!(error = %e, "skipping malformed NDJSON line");
                                }
                                IngestFailure::Storage(e) => return internal_error(e),
                            }
                        }
                    }
                }
                None => break,
            }
        }
        // Trailing data without a final newline is still a record.
        let tail = trim_ascii(&buf).to_vec();
        if !tail.is_empty() {
            if let Err(failure) =
                ingest_line(&state, &tail, &mut accepted, &mut active_session).await
            {
                match failure {
                    IngestFailure::Malformed(e) => {
                        warn!(error = %e, "skipping malformed NDJSON tail");
                    }
                    IngestFailure::Storage(e) => return internal_error(e),
                }
            }
        }
    } else {
        let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => return bad_request(format!("body read failed: {e}")),
        };
        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => return bad_request(format!("invalid JSON: {e}")),
        };
        let items = match value {
            Value::Object(_) => vec![value],
            Value::Array(items) => items,
            _ => return bad_request("expected a JSON object or array"),
        };
        for item in items {
            match ingest_value(&state, item, &mut active_session).await {
                Ok(()) => accepted += 1,
                Err(IngestFailure::Malformed(e)) => return bad_request(e),
                Err(IngestFailure::Storage(e)) => return internal_error(e),
            }
        }
    }

    (
        StatusCode::OK,
        Json(IngestResponse {
            accepted,
            session_id: active_session,
        }),
    )
        .into_response()
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// One NDJSON line: an object, or an array of objects. Items that were
/// accepted before a malformed one stay accepted.
async fn ingest_line(
    state: &AppState,
    line: &[u8],
    accepted: &mut usize,
    active_session: &mut Option<Uuid>,
) -> Result<(), IngestFailure> {
    let value: Value =
        serde_json::from_slice(line).map_err(|e| IngestFailure::Malformed(e.to_string()))?;
    match value {
        Value::Object(_) => {
            ingest_value(state, value, active_session).await?;
            *accepted += 1;
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                ingest_value(state, item, active_session).await?;
                *accepted += 1;
            }
            Ok(())
        }
        _ => Err(IngestFailure::Malformed(
            "expected a JSON object or array".to_owned(),
        )),
    }
}

async fn ingest_value(
    state: &AppState,
    value: Value,
    active_session: &mut Option<Uuid>,
) -> Result<(), IngestFailure> {
    let rec: RecordIngest =
        serde_json::from_value(value).map_err(|e| IngestFailure::Malformed(e.to_string()))?;
    let session_id = process_record(state, rec).await?;
    if session_id.is_some() {
        *active_session = session_id;
    }
    Ok(())
}

/// Normalize one record, apply the session lifecycle, persist, broadcast,
/// and schedule derivation for ECG. Returns the device's active session
/// after the record.
async fn process_record(
    state: &AppState,
    rec: RecordIngest,
) -> Result<Option<Uuid>, IngestFailure> {
    let now_ms = now_epoch_ms();
    let device_id = rec
        .device_id
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_owned());

    repo::devices::observe(&state.pool, &device_id)
        .await
        .map_err(IngestFailure::Storage)?;

    let handle = state.sessions.get(&device_id).await;
    let session_id = {
        let mut dev = handle.lock().await;
        let active = repo::sessions::find_active(&state.pool, &device_id)
            .await
            .map_err(IngestFailure::Storage)?;
        let mut session_id = active.as_ref().map(|s| s.session_id);
        dev.session_id = session_id;

        if rec.signal == "BreathTarget" {
            let target_rr = rec.target_rr.unwrap_or(0.0);
            let technique_name = rec.technique.clone();

            if target_rr <= 0.0 {
                if let Some(session) = &active {
                    repo::sessions::end(
                        &state.pool,
                        session.session_id,
                        Utc::now(),
                        SessionStatus::Completed,
                    )
                    .await
                    .map_err(IngestFailure::Storage)?;
                    dev.clear();
                    session_id = None;
                }
            } else if let Some(session) = &active {
                repo::sessions::update_target(
                    &state.pool,
                    session.session_id,
                    technique_name.as_deref(),
                    target_rr,
                )
                .await
                .map_err(IngestFailure::Storage)?;
                dev.technique_name = technique_name;
                dev.target_rr = target_rr;
                dev.breath_cycle = rec.breath_cycle;
            } else {
                let ts = rec.normalized_ts(now_ms);
                let started_at = Utc
                    .timestamp_millis_opt(ts)
                    .earliest()
                    .unwrap_or_else(Utc::now);
                let session = Session::new(
                    device_id.clone(),
                    technique_name.clone(),
                    Some(target_rr),
                    started_at,
                );
                repo::sessions::insert(&state.pool, &session)
                    .await
                    .map_err(IngestFailure::Storage)?;
                session_id = Some(session.session_id);

                // The technique decides which parameter snapshot (and ring
                // capacity) the coming derivations use.
                if let Some(name) = &technique_name {
                    match repo::param_sets::resolve_by_technique(&state.pool, name).await {
                        Ok(resolution) => dev.apply_params(Arc::new(resolution.params)),
                        Err(e) => {
                            warn!(technique = %name, error = %e, "failed to resolve technique parameters");
                        }
                    }
                }
                dev.session_id = session_id;
                dev.technique_name = technique_name;
                dev.target_rr = target_rr;
                dev.breath_cycle = rec.breath_cycle;
                dev.feedback = FeedbackState::default();
            }
        }
        session_id
    };

    let record = rec
        .into_record(now_ms, session_id)
        .map_err(|e| IngestFailure::Malformed(e.to_string()))?;
    repo::signals::insert(&state.pool, &record)
        .await
        .map_err(IngestFailure::Storage)?;

    let record = Arc::new(record);
    state.fanout.broadcast(Arc::clone(&record));

    if record.signal == SignalKind::Ecg {
        if let Some(sid) = record.session_id {
            if let SignalPayload::Ecg(payload) = &record.payload {
                let block = EcgBlock {
                    ts: record.ts,
                    samples: payload.samples.clone(),
                };
                tokio::spawn(process_ecg(
                    state.clone(),
                    record.device_id.clone(),
                    sid,
                    block,
                ));
            }
        }
    }

    Ok(session_id)
}

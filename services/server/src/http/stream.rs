//! GET /api/v1/stream — live SSE fan-out with signal-type filtering.

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::stream;
use serde::Deserialize;
use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;

use crate::fanout::UNKNOWN_DEVICE;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated signal types, or `all`.
    #[serde(default = "default_signals")]
    pub signals: String,
    #[serde(default = "default_device")]
    pub device_id: String,
}

fn default_signals() -> String {
    "all".to_owned()
}

fn default_device() -> String {
    UNKNOWN_DEVICE.to_owned()
}

pub async fn stream_signals(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let wanted: HashSet<String> = query
        .signals
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    let pass_all = wanted.is_empty() || wanted.contains("all");

    let subscription = state.fanout.subscribe(&query.device_id);

    // The subscription unregisters itself when the client disconnects and
    // this stream (owning it) is dropped.
    let events = stream::unfold(subscription, move |mut subscription| {
        let wanted = wanted.clone();
        let pass_all = pass_all;
        async move {
            loop {
                let record = subscription.rx.recv().await?;
                if !pass_all && !wanted.contains(record.signal.as_str()) {
                    continue;
                }
                match serde_json::to_string(&*record) {
                    Ok(json) => {
                        return Some((
                            Ok::<Event, Infallible>(Event::default().data(json)),
                            subscription,
                        ))
                    }
                    Err(_) => continue,
                }
            }
        }
    });

    let mut response = Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response();

    // Long-lived one-way stream: keep intermediaries from buffering it.
    let headers = response.headers_mut();
    headers.insert("Cache-Control", "no-cache".parse().expect("static header"));
    headers.insert("Connection", "keep-alive".parse().expect("static header"));
    headers.insert("X-Accel-Buffering", "no".parse().expect("static header"));
    response
}

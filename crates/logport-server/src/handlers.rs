// HTTP request handlers for the ingestion server
//
// Single responsibility: validate the request, hand each entry to the
// coalescer, and translate per-entry results into a JSON response.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use logport_core::{IncomingLogEntry, LogEntry};
use serde::Serialize;
use serde_json::json;

use crate::state::AppState;

/// A request body is either a single entry or a batch of entries.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum EntriesBody {
    One(IncomingLogEntry),
    Many(Vec<IncomingLogEntry>),
}

impl EntriesBody {
    fn into_vec(self) -> Vec<IncomingLogEntry> {
        match self {
            EntriesBody::One(entry) => vec![entry],
            EntriesBody::Many(entries) => entries,
        }
    }
}

#[derive(Serialize)]
struct EntryResult {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// POST /v1/entries - accepts a single entry or a JSON array of
/// entries, hands each to the coalescer, and reports per-entry status.
pub(crate) async fn handle_entries(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Response, Response> {
    if body.len() > state.max_payload_bytes {
        return Err(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "payload {} bytes exceeds limit {} bytes",
                body.len(),
                state.max_payload_bytes
            ),
        ));
    }

    let parsed: EntriesBody = serde_json::from_slice(&body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))?;
    let incoming = parsed.into_vec();
    if incoming.is_empty() {
        return Ok((StatusCode::OK, Json(json!({ "accepted": 0, "results": [] }))).into_response());
    }

    let mut accepted = 0usize;
    let mut results = Vec::with_capacity(incoming.len());
    let mut pending = Vec::with_capacity(incoming.len());

    for raw in incoming {
        match LogEntry::from_incoming(raw) {
            Ok(entry) => pending.push(entry),
            Err(e) => results.push(EntryResult {
                status: "error",
                error: Some(e.to_string()),
            }),
        }
    }

    let futures = pending.into_iter().map(|entry| {
        let coalescer = std::sync::Arc::clone(&state.coalescer);
        async move { coalescer.add(entry).await }
    });
    let outcomes = futures::future::join_all(futures).await;

    let mut outcome_iter = outcomes.into_iter();
    let mut final_results = Vec::with_capacity(results.len() + outcome_iter.len());
    for outcome in outcome_iter.by_ref() {
        final_results.push(match outcome {
            Ok(()) => {
                accepted += 1;
                EntryResult {
                    status: "ok",
                    error: None,
                }
            }
            Err(e) => EntryResult {
                status: "error",
                error: Some(e.to_string()),
            },
        });
    }
    final_results.extend(results);

    let response = Json(json!({
        "accepted": accepted,
        "results": final_results,
    }));
    Ok((StatusCode::OK, response).into_response())
}

/// GET /health - process is up and serving requests.
pub(crate) async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// GET /ready - at least one worker has reported in.
pub(crate) async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.worker_count() > 0 {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready" })),
        )
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

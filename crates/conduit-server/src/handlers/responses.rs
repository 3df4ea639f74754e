use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use conduit_core::ResponseId;
use conduit_engine::modes::is_project_subject;
use conduit_engine::multiplexer::status_json;
use conduit_engine::{subscribe, ChatStream, PlainStream, StreamDecorator, StreamSignal};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub start_from: usize,
}

fn to_sse(signal: &StreamSignal) -> SseEvent {
    SseEvent::default().event(signal.name()).data(signal.data())
}

/// `GET /stream?id=&start_from=`: replay from the cursor, then follow live.
/// Chat responses also carry status and title side events.
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let id = ResponseId::from_raw(query.id);
    let registry = state.orchestrator.registry();
    let decorator: Box<dyn StreamDecorator> = match registry.get(&id) {
        Some(entry) if is_project_subject(entry.subject_key()) => Box::new(PlainStream),
        _ => Box::new(ChatStream::default()),
    };
    let signals = subscribe(
        registry,
        &id,
        query.start_from,
        state.settings.generation.poll_interval(),
        decorator,
    );
    Sse::new(signals.map(|signal| Ok::<_, Infallible>(to_sse(&signal))))
        .keep_alive(KeepAlive::default())
}

/// `GET /status/{id}`
pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    Json(status_json(state.orchestrator.registry(), &ResponseId::from_raw(id)))
}

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    #[serde(default)]
    pub subject: Option<String>,
}

/// `GET /active?subject=`: ids of pending or running responses.
pub async fn active(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
) -> Json<Value> {
    let subject = query.subject.filter(|s| !s.is_empty());
    let ids = state.orchestrator.registry().active_ids(subject.as_deref());
    Json(json!({ "responseIds": ids }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopBody {
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

/// Only an empty body means "stop everything"; anything else must parse.
fn parse_stop_body(body: &[u8]) -> Result<StopBody, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StopBody::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid stop request: {e}")))
}

/// `POST /stop`: cancel one response, or every active one (optionally for a
/// single subject). An empty body stops everything. Running agents are
/// terminated by their own tasks.
pub async fn stop(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_stop_body(&body)?;
    let cancelled = match body.response_id.filter(|id| !id.is_empty()) {
        Some(id) => usize::from(state.orchestrator.cancel(&ResponseId::from_raw(id))),
        None => state
            .orchestrator
            .cancel_active(body.subject.as_deref().filter(|s| !s.is_empty())),
    };
    info!(cancelled, "stop requested");
    Ok(Json(json!({ "cancelled": cancelled })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{Event, EventKind};

    #[test]
    fn signals_keep_their_names() {
        let signal = StreamSignal::Event(Event::new(EventKind::Text, json!({"text": "hi"}), 0));
        assert_eq!(signal.name(), "text");
        let _ = to_sse(&signal);
        assert_eq!(StreamSignal::Done("12".into()).data(), "12");
    }

    #[test]
    fn stop_body_must_parse_unless_empty() {
        assert!(parse_stop_body(b"").unwrap().response_id.is_none());
        assert!(parse_stop_body(b"  \n").unwrap().subject.is_none());
        let body = parse_stop_body(br#"{"responseId":"ab12cd34"}"#).unwrap();
        assert_eq!(body.response_id.as_deref(), Some("ab12cd34"));

        let err = parse_stop_body(br#"{"responseId": 12345}"#).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(parse_stop_body(b"not json").is_err());
    }
}

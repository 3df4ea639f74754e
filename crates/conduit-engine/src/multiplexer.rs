//! Resumable event streams over a response's log.
//!
//! Each subscriber owns a cursor into the shared log and never blocks the
//! writer. A subscriber wakes on the entry's change notification or after
//! the poll interval, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde_json::Value;

use conduit_core::{Event, ResponseId, ResponseStatus};

use crate::registry::{ResponseEntry, ResponseRegistry};

pub const NOT_FOUND_MESSAGE: &str = "Session not found.";

/// One item delivered to a subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamSignal {
    Event(Event),
    /// Caller-specific side channel (status, title, ...). Plain text data.
    Extra { name: String, data: String },
    Error(String),
    Done(String),
}

impl StreamSignal {
    /// SSE event name.
    pub fn name(&self) -> &str {
        match self {
            Self::Event(e) => e.kind.as_str(),
            Self::Extra { name, .. } => name,
            Self::Error(_) => "error",
            Self::Done(_) => "done",
        }
    }

    /// SSE data field.
    pub fn data(&self) -> String {
        match self {
            Self::Event(e) => e.wire_payload().to_string(),
            Self::Extra { data, .. } => data.clone(),
            Self::Error(reason) => reason.clone(),
            Self::Done(payload) => payload.clone(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Per-subscriber specialization of a stream.
pub trait StreamDecorator: Send {
    /// Extra signals to emit before this turn's events.
    fn extra_signals(&mut self, _entry: &ResponseEntry) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Data carried by the final `done` of a completed response.
    fn done_payload(&self, _entry: &ResponseEntry) -> String {
        String::new()
    }
}

/// Decorator that adds nothing.
pub struct PlainStream;

impl StreamDecorator for PlainStream {}

/// Subscribe to a response starting at event index `from`.
///
/// The stream always ends with [`StreamSignal::Done`]. An unknown id, or a
/// response that failed, yields [`StreamSignal::Error`] first.
pub fn subscribe(
    registry: &ResponseRegistry,
    id: &ResponseId,
    from: usize,
    poll_interval: Duration,
    mut decorator: Box<dyn StreamDecorator>,
) -> impl Stream<Item = StreamSignal> + Send + 'static {
    let entry: Option<Arc<ResponseEntry>> = registry.get(id);

    async_stream::stream! {
        let Some(entry) = entry else {
            yield StreamSignal::Error(NOT_FOUND_MESSAGE.to_string());
            yield StreamSignal::Done(String::new());
            return;
        };

        let mut cursor = from;
        loop {
            if entry.is_cancelled() {
                yield StreamSignal::Done(String::new());
                return;
            }

            let changed = entry.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            for (name, data) in decorator.extra_signals(&entry) {
                yield StreamSignal::Extra { name, data };
            }

            let (status, events) = entry.read_from(cursor);
            for event in events {
                cursor = event.index + 1;
                yield StreamSignal::Event(event);
            }

            match status {
                ResponseStatus::Completed => {
                    yield StreamSignal::Done(decorator.done_payload(&entry));
                    return;
                }
                ResponseStatus::Error => {
                    let reason = entry.error().unwrap_or_else(|| "Unknown error".to_string());
                    yield StreamSignal::Error(reason);
                    yield StreamSignal::Done(String::new());
                    return;
                }
                ResponseStatus::Pending | ResponseStatus::Running => {}
            }

            tokio::select! {
                _ = &mut changed => {}
                _ = entry.cancel_token().cancelled() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

/// Status payload for `/status`-style queries: `{"status":"not_found"}`
/// for unknown ids.
pub fn status_json(registry: &ResponseRegistry, id: &ResponseId) -> Value {
    match registry.get(id) {
        Some(entry) => serde_json::to_value(entry.snapshot())
            .unwrap_or_else(|_| serde_json::json!({ "status": "error" })),
        None => serde_json::json!({ "status": "not_found" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::EventKind;
    use futures::StreamExt;
    use serde_json::json;

    fn registry() -> ResponseRegistry {
        ResponseRegistry::new(Duration::from_secs(600))
    }

    async fn collect(
        registry: &ResponseRegistry,
        id: &ResponseId,
        from: usize,
    ) -> Vec<StreamSignal> {
        let poll = Duration::from_millis(10);
        let stream = subscribe(registry, id, from, poll, Box::new(PlainStream));
        tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .unwrap()
    }

    fn indices(signals: &[StreamSignal]) -> Vec<usize> {
        signals
            .iter()
            .filter_map(|s| match s {
                StreamSignal::Event(e) => Some(e.index),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn unknown_id_errors_then_ends() {
        let reg = registry();
        let signals = collect(&reg, &ResponseId::from_raw("deadbeef"), 0).await;
        assert_eq!(
            signals,
            vec![
                StreamSignal::Error(NOT_FOUND_MESSAGE.into()),
                StreamSignal::Done(String::new())
            ]
        );
    }

    #[tokio::test]
    async fn live_events_arrive_in_order() {
        let reg = registry();
        let entry = reg.create("s1");
        let id = entry.id().clone();
        let writer = Arc::clone(&entry);
        let producer = tokio::spawn(async move {
            writer.set_status(ResponseStatus::Running);
            for i in 0..5 {
                writer.push_event(EventKind::Text, json!({ "content": format!("t{i}") }));
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            writer.set_status(ResponseStatus::Completed);
        });

        let signals = collect(&reg, &id, 0).await;
        producer.await.unwrap();
        assert_eq!(indices(&signals), vec![0, 1, 2, 3, 4]);
        assert_eq!(signals.last(), Some(&StreamSignal::Done(String::new())));
    }

    #[tokio::test]
    async fn resumed_subscription_replays_the_suffix() {
        let reg = registry();
        let entry = reg.create("s1");
        for i in 0..6 {
            entry.push_event(EventKind::Text, json!({ "n": i }));
        }
        entry.set_status(ResponseStatus::Completed);

        let full = collect(&reg, entry.id(), 0).await;
        let resumed = collect(&reg, entry.id(), 3).await;
        let full_events: Vec<_> = full
            .into_iter()
            .filter(|s| matches!(s, StreamSignal::Event(e) if e.index >= 3))
            .collect();
        let resumed_events: Vec<_> = resumed
            .into_iter()
            .filter(|s| matches!(s, StreamSignal::Event(_)))
            .collect();
        assert_eq!(full_events, resumed_events);
        assert_eq!(indices(&resumed_events), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn failure_emits_error_before_done() {
        let reg = registry();
        let entry = reg.create("s1");
        entry.push_event(EventKind::Init, json!({ "sessionId": "a" }));
        entry.fail("Previous response is still processing.");

        let signals = collect(&reg, entry.id(), 0).await;
        assert_eq!(signals.len(), 3);
        assert!(matches!(signals[0], StreamSignal::Event(_)));
        assert_eq!(
            signals[1],
            StreamSignal::Error("Previous response is still processing.".into())
        );
        assert_eq!(signals[2], StreamSignal::Done(String::new()));
    }

    #[tokio::test]
    async fn cancellation_ends_the_stream() {
        let reg = registry();
        let entry = reg.create("s1");
        entry.set_status(ResponseStatus::Running);
        let canceller = Arc::clone(&entry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let signals = collect(&reg, entry.id(), 0).await;
        assert_eq!(signals, vec![StreamSignal::Done(String::new())]);
    }

    struct Labelled;

    impl StreamDecorator for Labelled {
        fn done_payload(&self, entry: &ResponseEntry) -> String {
            entry.message_id().map(|id| id.to_string()).unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn decorator_supplies_done_payload() {
        let reg = registry();
        let entry = reg.create("s1");
        entry.set_message_id(42);
        entry.set_status(ResponseStatus::Completed);
        let stream = subscribe(&reg, entry.id(), 0, Duration::from_millis(10), Box::new(Labelled));
        let signals: Vec<_> = stream.collect().await;
        assert_eq!(signals, vec![StreamSignal::Done("42".into())]);
    }

    #[test]
    fn event_signal_carries_index_on_the_wire() {
        let event = Event::new(EventKind::Text, json!({ "content": "hi" }), 7);
        let signal = StreamSignal::Event(event);
        assert_eq!(signal.name(), "text");
        let data: Value = serde_json::from_str(&signal.data()).unwrap();
        assert_eq!(data["_idx"], 7);
        assert_eq!(data["content"], "hi");
    }

    #[test]
    fn status_json_for_unknown_id() {
        let reg = registry();
        assert_eq!(
            status_json(&reg, &ResponseId::from_raw("nope")),
            json!({ "status": "not_found" })
        );
    }
}

//! In-memory table of generation runs and their event logs.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use conduit_core::{Event, EventKind, ResponseId, ResponseStatus};

#[derive(Debug)]
struct ResponseState {
    status: ResponseStatus,
    events: Vec<Event>,
    final_text: String,
    context_percent: f64,
    error: Option<String>,
    title: Option<String>,
    message_id: Option<i64>,
}

/// One generation run. Written only by the task that owns the run;
/// read by any number of stream observers.
#[derive(Debug)]
pub struct ResponseEntry {
    id: ResponseId,
    subject_key: String,
    created_at: Instant,
    cancel: CancellationToken,
    pid: Mutex<Option<u32>>,
    state: RwLock<ResponseState>,
    changed: Notify,
}

/// Point-in-time copy of an entry, used for status queries.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    pub response_id: ResponseId,
    pub subject_key: String,
    pub status: ResponseStatus,
    pub events: Vec<Event>,
    pub final_result: String,
    pub context_percent: f64,
    pub error: Option<String>,
    pub title: Option<String>,
    pub message_id: Option<i64>,
}

impl ResponseEntry {
    fn new(subject_key: String) -> Self {
        Self {
            id: ResponseId::new(),
            subject_key,
            created_at: Instant::now(),
            cancel: CancellationToken::new(),
            pid: Mutex::new(None),
            state: RwLock::new(ResponseState {
                status: ResponseStatus::Pending,
                events: Vec::new(),
                final_text: String::new(),
                context_percent: 0.0,
                error: None,
                title: None,
                message_id: None,
            }),
            changed: Notify::new(),
        }
    }

    pub fn id(&self) -> &ResponseId {
        &self.id
    }

    pub fn subject_key(&self) -> &str {
        &self.subject_key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn status(&self) -> ResponseStatus {
        self.state.read().status
    }

    /// Move the lifecycle forward. Returns false (and changes nothing) for
    /// a backwards or post-terminal transition.
    pub fn set_status(&self, next: ResponseStatus) -> bool {
        let moved = {
            let mut state = self.state.write();
            if state.status.can_transition_to(next) {
                state.status = next;
                true
            } else {
                false
            }
        };
        if moved {
            self.changed.notify_waiters();
        }
        moved
    }

    /// Record a failure and move to `error`.
    pub fn fail(&self, reason: impl Into<String>) {
        {
            let mut state = self.state.write();
            if state.status.is_terminal() {
                return;
            }
            state.error = Some(reason.into());
            state.status = ResponseStatus::Error;
        }
        self.changed.notify_waiters();
    }

    /// Append to the event log, returning the new event's index.
    pub fn push_event(&self, kind: EventKind, data: Value) -> usize {
        let index = {
            let mut state = self.state.write();
            let index = state.events.len();
            state.events.push(Event::new(kind, data, index));
            index
        };
        self.changed.notify_waiters();
        index
    }

    /// Current status plus every event at or after `from`, read together so
    /// a terminal status is never observed ahead of the events before it.
    pub fn read_from(&self, from: usize) -> (ResponseStatus, Vec<Event>) {
        let state = self.state.read();
        let events = state.events.get(from..).map(<[Event]>::to_vec).unwrap_or_default();
        (state.status, events)
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.read().events.clone()
    }

    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }

    pub fn set_final_text(&self, text: &str) {
        self.state.write().final_text = text.to_string();
    }

    pub fn final_text(&self) -> String {
        self.state.read().final_text.clone()
    }

    pub fn set_context_percent(&self, percent: f64) {
        self.state.write().context_percent = percent;
    }

    pub fn context_percent(&self) -> f64 {
        self.state.read().context_percent
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn set_title(&self, title: &str) {
        self.state.write().title = Some(title.to_string());
        self.changed.notify_waiters();
    }

    pub fn title(&self) -> Option<String> {
        self.state.read().title.clone()
    }

    pub fn set_message_id(&self, id: i64) {
        self.state.write().message_id = Some(id);
    }

    pub fn message_id(&self) -> Option<i64> {
        self.state.read().message_id
    }

    pub fn set_pid(&self, pid: Option<u32>) {
        *self.pid.lock() = pid;
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.changed.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Future resolved by the next state change. Registered on creation,
    /// so create it before reading state to avoid missing a wakeup.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    pub fn snapshot(&self) -> ResponseSnapshot {
        let state = self.state.read();
        ResponseSnapshot {
            response_id: self.id.clone(),
            subject_key: self.subject_key.clone(),
            status: state.status,
            events: state.events.clone(),
            final_result: state.final_text.clone(),
            context_percent: state.context_percent,
            error: state.error.clone(),
            title: state.title.clone(),
            message_id: state.message_id,
        }
    }
}

/// Response id → entry. Terminal entries are dropped once older than the
/// retention window.
pub struct ResponseRegistry {
    entries: DashMap<ResponseId, Arc<ResponseEntry>>,
    retention: Duration,
}

impl ResponseRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    /// Register a fresh `pending` entry.
    pub fn create(&self, subject_key: impl Into<String>) -> Arc<ResponseEntry> {
        let entry = Arc::new(ResponseEntry::new(subject_key.into()));
        self.entries.insert(entry.id().clone(), Arc::clone(&entry));
        entry
    }

    pub fn get(&self, id: &ResponseId) -> Option<Arc<ResponseEntry>> {
        self.entries.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop terminal entries older than the retention window.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !(entry.status().is_terminal()
                && now.duration_since(entry.created_at()) > self.retention)
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "reaped finished responses");
        }
        removed
    }

    /// Ids of pending or running responses, optionally for one subject.
    pub fn active_ids(&self, subject_key: Option<&str>) -> Vec<ResponseId> {
        self.entries
            .iter()
            .filter(|e| !e.status().is_terminal())
            .filter(|e| subject_key.map_or(true, |s| e.subject_key() == s))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn cancel(&self, id: &ResponseId) -> bool {
        match self.get(id) {
            Some(entry) => {
                entry.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every non-terminal response, optionally for one subject.
    pub fn cancel_active(&self, subject_key: Option<&str>) -> usize {
        let ids = self.active_ids(subject_key);
        ids.iter().filter(|id| self.cancel(id)).count()
    }
}

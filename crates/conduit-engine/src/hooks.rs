//! Per-mode specialization points for a generation run.

use std::sync::Arc;

use conduit_core::EventKind;

use crate::registry::ResponseEntry;

/// Strategy passed into each run. Every method has a no-op default.
pub trait RunHooks: Send + Sync {
    /// Called once the lock is held on a subject's first turn, before the
    /// agent is launched. Must not block; spawn for slow work.
    fn on_first_turn(&self, _entry: &Arc<ResponseEntry>, _message: &str) {}

    /// Called after each `text` event with the full response so far.
    fn on_text(&self, _entry: &ResponseEntry, _full_text: &str) {}

    /// Event kinds kept when the assistant message is persisted.
    /// `None` keeps everything.
    fn persist_filter(&self) -> Option<&[EventKind]> {
        None
    }

    /// Called with the id of the persisted assistant message.
    fn on_persisted(&self, _entry: &ResponseEntry, _message_id: i64) {}
}

/// Hooks that do nothing.
pub struct NoopHooks;

impl RunHooks for NoopHooks {}

/// Apply a persistence filter to an event log.
pub fn filter_events(
    events: Vec<conduit_core::Event>,
    keep: Option<&[EventKind]>,
) -> Vec<conduit_core::Event> {
    match keep {
        None => events,
        Some(kinds) => events.into_iter().filter(|e| kinds.contains(&e.kind)).collect(),
    }
}

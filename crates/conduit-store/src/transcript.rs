use conduit_core::{Event, MessageRole, TranscriptError, TranscriptStore};

use crate::database::Database;
use crate::messages::MessageRepo;
use crate::sessions::{SessionRepo, DEFAULT_TITLE};

/// [`TranscriptStore`] backed by the SQLite session and message tables.
///
/// Project-scoped subjects are keyed `"{mode}_{name}"`; their session row
/// is created on first write with that mode and the project name as title.
pub struct SqliteTranscript {
    sessions: SessionRepo,
    messages: MessageRepo,
}

impl SqliteTranscript {
    pub fn new(db: Database) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        }
    }
}

fn subject_mode_and_title(subject: &str) -> (&str, &str) {
    match subject.split_once('_') {
        Some((mode @ ("code" | "paper"), name)) if !name.is_empty() => (mode, name),
        _ => ("chat", DEFAULT_TITLE),
    }
}

impl TranscriptStore for SqliteTranscript {
    fn append_message(
        &self,
        subject: &str,
        role: MessageRole,
        content: &str,
        events: Option<&[Event]>,
    ) -> Result<i64, TranscriptError> {
        let (mode, title) = subject_mode_and_title(subject);
        let _ = self.sessions.ensure(subject, mode, title)?;
        let events = match events {
            Some(list) if !list.is_empty() => Some(
                serde_json::to_value(list).map_err(|e| TranscriptError::new(e.to_string()))?,
            ),
            _ => None,
        };
        Ok(self
            .messages
            .append(subject, role.as_str(), content, events.as_ref())?)
    }

    fn update_context_usage(&self, subject: &str, percent: f64) -> Result<(), TranscriptError> {
        Ok(self.sessions.update_context_percent(subject, percent)?)
    }

    fn set_title(&self, subject: &str, title: &str) -> Result<(), TranscriptError> {
        Ok(self.sessions.update_title(subject, title)?)
    }
}

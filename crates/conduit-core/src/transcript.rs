use serde::{Deserialize, Serialize};

use crate::events::Event;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("transcript store: {0}")]
pub struct TranscriptError(String);

impl TranscriptError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Durable conversation state the orchestrator writes through.
///
/// `subject` is the subject key of the run (a chat session id, or
/// `"{mode}_{name}"` for project-scoped runs).
pub trait TranscriptStore: Send + Sync {
    /// Append a message, returning its id.
    fn append_message(
        &self,
        subject: &str,
        role: MessageRole,
        content: &str,
        events: Option<&[Event]>,
    ) -> Result<i64, TranscriptError>;

    fn update_context_usage(&self, subject: &str, percent: f64) -> Result<(), TranscriptError>;

    fn set_title(&self, subject: &str, title: &str) -> Result<(), TranscriptError>;
}

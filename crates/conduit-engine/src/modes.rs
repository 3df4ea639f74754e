//! Chat and project specializations of a generation run and its stream.

use std::sync::Arc;

use tracing::warn;

use conduit_core::{EventKind, ResponseStatus, TranscriptStore};

use crate::hooks::RunHooks;
use crate::multiplexer::StreamDecorator;
use crate::registry::ResponseEntry;
use crate::title::TitleGenerator;

pub const CHAT_MODE: &str = "chat";
pub const PROJECT_MODES: [&str; 2] = ["code", "paper"];

/// Event kinds kept in a project's stored transcript.
pub const PROJECT_PERSISTED_EVENTS: [EventKind; 4] = [
    EventKind::Text,
    EventKind::ToolUse,
    EventKind::EditResult,
    EventKind::BashResult,
];

pub fn is_project_mode(mode: &str) -> bool {
    PROJECT_MODES.contains(&mode)
}

/// Lock and transcript key of a project conversation.
pub fn project_subject_key(mode: &str, name: &str) -> String {
    format!("{mode}_{name}")
}

/// Whether a lock key belongs to a project conversation.
pub fn is_project_subject(subject_key: &str) -> bool {
    subject_key
        .split_once('_')
        .is_some_and(|(mode, name)| is_project_mode(mode) && !name.is_empty())
}

/// Store setting holding a project's agent session token.
pub fn agent_session_setting_key(subject_key: &str) -> String {
    format!("cli_session_{subject_key}")
}

/// Chat runs name the conversation on its first turn.
pub struct ChatHooks {
    store: Arc<dyn TranscriptStore>,
    titles: TitleGenerator,
}

impl ChatHooks {
    pub fn new(store: Arc<dyn TranscriptStore>, titles: TitleGenerator) -> Self {
        Self { store, titles }
    }
}

impl RunHooks for ChatHooks {
    fn on_first_turn(&self, entry: &Arc<ResponseEntry>, message: &str) {
        let entry = Arc::clone(entry);
        let store = Arc::clone(&self.store);
        let titles = self.titles.clone();
        let message = message.to_string();
        tokio::spawn(async move {
            let title = titles.generate(&message).await;
            if let Err(e) = store.set_title(entry.subject_key(), &title) {
                warn!(subject = entry.subject_key(), error = %e, "failed to store title");
            }
            entry.set_title(&title);
        });
    }
}

/// Project runs store a reduced event set.
pub struct ProjectHooks;

impl RunHooks for ProjectHooks {
    fn persist_filter(&self) -> Option<&[EventKind]> {
        Some(&PROJECT_PERSISTED_EVENTS)
    }
}

/// Chat streams announce when the agent starts responding and, once, the
/// generated title with its session id. `done` carries the stored message id.
#[derive(Default)]
pub struct ChatStream {
    last_status: Option<ResponseStatus>,
    title_sent: bool,
}

impl StreamDecorator for ChatStream {
    fn extra_signals(&mut self, entry: &ResponseEntry) -> Vec<(String, String)> {
        let mut signals = Vec::new();
        let status = entry.status();
        if self.last_status != Some(status) {
            if status == ResponseStatus::Running {
                signals.push(("status".to_string(), "Agent is responding...".to_string()));
            }
            self.last_status = Some(status);
        }
        if !self.title_sent {
            if let Some(title) = entry.title() {
                signals.push(("title".to_string(), title));
                signals.push(("session_id".to_string(), entry.subject_key().to_string()));
                self.title_sent = true;
            }
        }
        signals
    }

    fn done_payload(&self, entry: &ResponseEntry) -> String {
        entry.message_id().map(|id| id.to_string()).unwrap_or_default()
    }
}

//! Fixtures shared by engine tests.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use conduit_core::{Event, MessageRole, TranscriptError, TranscriptStore};

/// Executable shell script standing in for an external binary.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    pub subject: String,
    pub role: MessageRole,
    pub content: String,
    pub events: Option<Vec<Event>>,
}

/// Records every write for later assertions.
#[derive(Default)]
pub struct MemoryTranscript {
    pub messages: Mutex<Vec<StoredMessage>>,
    pub usage: Mutex<Vec<(String, f64)>>,
    pub titles: Mutex<Vec<(String, String)>>,
}

impl TranscriptStore for MemoryTranscript {
    fn append_message(
        &self,
        subject: &str,
        role: MessageRole,
        content: &str,
        events: Option<&[Event]>,
    ) -> Result<i64, TranscriptError> {
        let mut messages = self.messages.lock();
        messages.push(StoredMessage {
            subject: subject.into(),
            role,
            content: content.into(),
            events: events.map(<[Event]>::to_vec),
        });
        Ok(messages.len() as i64)
    }

    fn update_context_usage(&self, subject: &str, percent: f64) -> Result<(), TranscriptError> {
        self.usage.lock().push((subject.into(), percent));
        Ok(())
    }

    fn set_title(&self, subject: &str, title: &str) -> Result<(), TranscriptError> {
        self.titles.lock().push((subject.into(), title.into()));
        Ok(())
    }
}

//! Generation and terminal runtime limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    /// Bounded wait for a subject's session lock.
    pub lock_timeout_secs: u64,
    /// Age after which terminal responses are dropped from the registry.
    pub retention_secs: u64,
    /// Idle sleep between stream observer polls.
    pub poll_interval_ms: u64,
    /// How long a cancelled agent gets to exit after SIGTERM.
    pub terminate_grace_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 120,
            retention_secs: 600,
            poll_interval_ms: 50,
            terminate_grace_secs: 5,
        }
    }
}

impl GenerationSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalSettings {
    pub max_sessions: usize,
    pub idle_timeout_secs: u64,
    /// Readability poll interval for the PTY relay.
    pub poll_interval_ms: u64,
    /// Shell override; falls back to `$SHELL`, then `/bin/bash`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            max_sessions: 3,
            idle_timeout_secs: 600,
            poll_interval_ms: 20,
            shell: None,
            rows: 24,
            cols: 80,
        }
    }
}

impl TerminalSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resolve_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/bash".to_string())
    }
}

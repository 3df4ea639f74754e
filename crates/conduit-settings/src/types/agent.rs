//! External agent invocation settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::loader::expand_home;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Executable name or path of the agent CLI.
    pub binary: String,
    /// Pass `--dangerously-skip-permissions`; runs are non-interactive.
    pub skip_permissions: bool,
    pub allowed_models: Vec<String>,
    /// Used when a request names a model outside `allowed_models`.
    pub default_model: String,
    /// Working directory for chat-mode runs.
    pub chat_dir: String,
    /// Parent directory of project-scoped runs (`{workspace_dir}/{name}`).
    pub workspace_dir: String,
    pub system_prompt: String,
    /// Comma-separated built-in tools offered in chat mode.
    pub chat_tools: String,
    pub title_model: String,
    pub title_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            skip_permissions: true,
            allowed_models: vec!["haiku".into(), "sonnet".into(), "opus".into()],
            default_model: "sonnet".to_string(),
            chat_dir: "~/chat".to_string(),
            workspace_dir: "~/workspace".to_string(),
            system_prompt: "You are a helpful, friendly AI assistant.".to_string(),
            chat_tools: "WebSearch,Read".to_string(),
            title_model: "haiku".to_string(),
            title_timeout_secs: 10,
        }
    }
}

impl AgentSettings {
    /// Returns `requested` when allowed, otherwise the default model.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested {
            Some(m) if self.allowed_models.iter().any(|a| a == m) => m.to_string(),
            _ => self.default_model.clone(),
        }
    }

    pub fn chat_dir_path(&self) -> PathBuf {
        expand_home(&self.chat_dir)
    }

    pub fn workspace_dir_path(&self) -> PathBuf {
        expand_home(&self.workspace_dir)
    }
}

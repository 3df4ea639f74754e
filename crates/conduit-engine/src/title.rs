//! Short conversation titles from a one-turn agent call.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use conduit_core::OrchestratorError;
use conduit_settings::AgentSettings;

use crate::launcher::AgentInvocation;

pub const MAX_TITLE_CHARS: usize = 30;
const FALLBACK_PREFIX_CHARS: usize = 12;
const PROMPT_MESSAGE_CHARS: usize = 200;

/// First characters of the message, with `...` when it was cut.
pub fn fallback_title(message: &str) -> String {
    let mut chars = message.chars();
    let prefix: String = chars.by_ref().take(FALLBACK_PREFIX_CHARS).collect();
    if chars.next().is_some() {
        format!("{prefix}...")
    } else {
        prefix
    }
}

/// Strip quotes and a leading `Title:`; reject empty or overlong titles.
pub fn clean_title(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    let title = trimmed.strip_prefix("Title:").map(str::trim).unwrap_or(trimmed);
    (!title.is_empty() && title.chars().count() <= MAX_TITLE_CHARS).then(|| title.to_string())
}

fn title_prompt(message: &str) -> String {
    let excerpt: String = message.chars().take(PROMPT_MESSAGE_CHARS).collect();
    format!(
        "Create a short 2-4 word English title for the following question. \
         Output only the title.\n\nQuestion: {excerpt}\n\nTitle:"
    )
}

#[derive(Clone, Debug)]
pub struct TitleGenerator {
    binary: String,
    model: String,
    timeout: Duration,
}

impl TitleGenerator {
    pub fn new(binary: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            timeout,
        }
    }

    pub fn from_settings(agent: &AgentSettings) -> Self {
        Self::new(
            agent.binary.clone(),
            agent.title_model.clone(),
            Duration::from_secs(agent.title_timeout_secs),
        )
    }

    /// Ask the agent for a title, falling back to a message prefix on any
    /// failure, timeout, or unusable answer.
    pub async fn generate(&self, message: &str) -> String {
        match tokio::time::timeout(self.timeout, self.ask(message)).await {
            Ok(Ok(Some(title))) => title,
            Ok(Ok(None)) => fallback_title(message),
            Ok(Err(e)) => {
                debug!(error = %e, "title generation failed");
                fallback_title(message)
            }
            Err(_) => {
                debug!(timeout_secs = self.timeout.as_secs(), "title generation timed out");
                fallback_title(message)
            }
        }
    }

    async fn ask(&self, message: &str) -> Result<Option<String>, OrchestratorError> {
        let invocation = AgentInvocation {
            binary: self.binary.clone(),
            model: self.model.clone(),
            session: None,
            skip_permissions: false,
            extra_args: vec!["--max-turns".into(), "1".into()],
            tool_args: Vec::new(),
            work_dir: PathBuf::new(),
            message: title_prompt(message),
        };
        let mut process = invocation.spawn().await?;

        let mut title = None;
        while let Some(line) = process
            .next_line()
            .await
            .map_err(|e| OrchestratorError::SubprocessCrash(e.to_string()))?
        {
            let Ok(value) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            if value.get("type").and_then(Value::as_str) == Some("result") {
                title = value.get("result").and_then(Value::as_str).and_then(clean_title);
            }
        }

        let status = process
            .wait()
            .await
            .map_err(|e| OrchestratorError::SubprocessCrash(e.to_string()))?;
        Ok(if status.success() { title } else { None })
    }
}

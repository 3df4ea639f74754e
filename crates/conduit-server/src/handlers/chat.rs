use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use conduit_core::ids::new_agent_session_token;
use conduit_core::MessageRole;
use conduit_engine::modes::CHAT_MODE;
use conduit_engine::placeholders::expand_from_store;
use conduit_engine::{ChatHooks, GenerationRequest};
use conduit_store::sessions::DEFAULT_TITLE;
use conduit_store::{CommandRepo, MessageRepo, SessionRepo};

use super::{enabled_tools, require_message};
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: String,
    /// Continue this conversation; a new one is started when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mcp_tools: Option<Vec<String>>,
}

/// `POST /chat`: store the user turn and start a generation.
pub async fn start_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<Value>, ApiError> {
    let message = require_message(&body.message)?;
    state.orchestrator.registry().reap();

    let agent = &state.settings.agent;
    let model = agent.resolve_model(body.model.as_deref());
    let message = expand_from_store(message, &CommandRepo::new(state.db.clone()));

    let session_id = body
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(new_agent_session_token);
    SessionRepo::new(state.db.clone()).ensure(&session_id, CHAT_MODE, DEFAULT_TITLE)?;
    let messages = MessageRepo::new(state.db.clone());
    messages.append(&session_id, MessageRole::User.as_str(), &message, None)?;
    let is_first_turn = messages.count_user_messages(&session_id)? == 1;

    let enabled = enabled_tools(&state, body.mcp_tools)?;
    let request = GenerationRequest {
        subject_key: session_id.clone(),
        message,
        is_first_turn,
        resume_token: session_id.clone(),
        tool_policy: state.mcp.policy_for(CHAT_MODE, &enabled),
        extra_args: vec![
            "--system-prompt".into(),
            agent.system_prompt.clone(),
            "--tools".into(),
            agent.chat_tools.clone(),
        ],
        work_dir: agent.chat_dir_path(),
        model,
        hooks: Arc::new(ChatHooks::new(
            Arc::clone(state.orchestrator.store()),
            state.titles.clone(),
        )),
    };
    let response_id = state.orchestrator.start(request);
    info!(response_id = %response_id, session_id = %session_id, is_first_turn, "chat started");

    Ok(Json(json!({
        "responseId": response_id,
        "sessionId": session_id,
    })))
}

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use conduit_core::ids::new_agent_session_token;
use conduit_core::MessageRole;
use conduit_engine::mcp_table::is_valid_name;
use conduit_engine::modes::{agent_session_setting_key, is_project_mode, project_subject_key};
use conduit_engine::placeholders::expand_from_store;
use conduit_engine::{GenerationRequest, ProjectHooks};
use conduit_store::{CommandRepo, MessageRepo, SettingsRepo};

use super::{enabled_tools, require_message};
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectChatBody {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mcp_tools: Option<Vec<String>>,
}

/// `POST /projects/{mode}/{name}/chat`: run the agent inside a project
/// directory. The agent session token is kept per project across restarts.
pub async fn start_project_chat(
    State(state): State<AppState>,
    Path((mode, name)): Path<(String, String)>,
    Json(body): Json<ProjectChatBody>,
) -> Result<Json<Value>, ApiError> {
    if !is_project_mode(&mode) {
        return Err(ApiError::NotFound(format!("Unknown mode '{mode}'.")));
    }
    if !is_valid_name(&name) {
        return Err(ApiError::bad_request(
            "Name can only contain letters, numbers, _, and -.",
        ));
    }
    let message = require_message(&body.message)?;
    state.orchestrator.registry().reap();

    let agent = &state.settings.agent;
    let model = agent.resolve_model(body.model.as_deref());
    let message = expand_from_store(message, &CommandRepo::new(state.db.clone()));

    let subject_key = project_subject_key(&mode, &name);
    state
        .orchestrator
        .store()
        .append_message(&subject_key, MessageRole::User, &message, None)?;
    let stored = MessageRepo::new(state.db.clone()).count(&subject_key)?;

    let settings = SettingsRepo::new(state.db.clone());
    let token_key = agent_session_setting_key(&subject_key);
    let (resume_token, created) = match settings.get(&token_key)? {
        Some(token) if !token.is_empty() => (token, false),
        _ => {
            let token = new_agent_session_token();
            settings.set(&token_key, &token)?;
            (token, true)
        }
    };
    let is_first_turn = created || stored <= 1;

    let enabled = enabled_tools(&state, body.mcp_tools)?;
    let request = GenerationRequest {
        subject_key: subject_key.clone(),
        message,
        is_first_turn,
        resume_token,
        tool_policy: state.mcp.policy_for(&mode, &enabled),
        extra_args: Vec::new(),
        work_dir: agent.workspace_dir_path().join(&name),
        model,
        hooks: Arc::new(ProjectHooks),
    };
    let response_id = state.orchestrator.start(request);
    info!(response_id = %response_id, subject = %subject_key, is_first_turn, "project run started");

    Ok(Json(json!({
        "responseId": response_id,
        "subjectKey": subject_key,
    })))
}

//! HTTP endpoint handlers, grouped by resource.

pub mod chat;
pub mod commands;
pub mod mcp;
pub mod projects;
pub mod responses;
pub mod terminal;

use conduit_store::SettingsRepo;

use crate::error::ApiError;
use crate::server::AppState;

/// Store setting holding the tools the user switched on.
pub const ENABLED_TOOLS_SETTING_KEY: &str = "enabled_mcp_tools";

/// Tools allowed for a run: the request's own list, else the saved one.
pub(crate) fn enabled_tools(
    state: &AppState,
    requested: Option<Vec<String>>,
) -> Result<Vec<String>, ApiError> {
    if let Some(tools) = requested {
        return Ok(tools);
    }
    Ok(SettingsRepo::new(state.db.clone())
        .get_json::<Vec<String>>(ENABLED_TOOLS_SETTING_KEY)?
        .unwrap_or_default())
}

/// Trimmed message or a 400.
pub(crate) fn require_message(message: &str) -> Result<&str, ApiError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message is required."));
    }
    Ok(message)
}

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use conduit_settings::McpServerConfig;
use conduit_store::SettingsRepo;

use super::ENABLED_TOOLS_SETTING_KEY;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ToolsQuery {
    #[serde(default)]
    pub mode: Option<String>,
}

/// `GET /mcp/tools?mode=`: discovered tools offered in a mode.
pub async fn list_tools(
    State(state): State<AppState>,
    Query(query): Query<ToolsQuery>,
) -> Json<Value> {
    let mode = query.mode.filter(|m| !m.is_empty());
    Json(json!({ "tools": state.mcp.tools_for_mode(mode.as_deref()) }))
}

/// `GET /mcp/servers`
pub async fn list_servers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "servers": state.mcp.summaries() }))
}

/// `{name, ...config}`, or the bare config when the name is in the path.
fn parse_config(mut body: Value) -> Result<(Option<String>, McpServerConfig), ApiError> {
    let name = body
        .as_object_mut()
        .and_then(|obj| obj.remove("name"))
        .and_then(|v| v.as_str().map(str::to_string));
    let config = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid server config: {e}")))?;
    Ok((name, config))
}

fn discovered(name: &str, tools: usize) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": format!("Server '{name}' saved. {tools} tools discovered."),
        "toolCount": tools,
    }))
}

/// `POST /mcp/servers`
pub async fn add_server(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let (name, config) = parse_config(body)?;
    let name = name.unwrap_or_default();
    let tools = state.mcp.add(name.trim(), config).await?;
    info!(server = %name, tools, "tool server added");
    Ok(discovered(name.trim(), tools))
}

/// `PUT /mcp/servers/{name}`
pub async fn update_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let (_, config) = parse_config(body)?;
    let tools = state.mcp.update(&name, config).await?;
    info!(server = %name, tools, "tool server updated");
    Ok(discovered(&name, tools))
}

/// `DELETE /mcp/servers/{name}`
pub async fn remove_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.mcp.remove(&name)?;
    info!(server = %name, "tool server removed");
    Ok(Json(json!({
        "success": true,
        "message": format!("Server '{name}' removed."),
    })))
}

/// `POST /mcp/servers/refresh`: rediscover every server.
pub async fn refresh_servers(State(state): State<AppState>) -> Json<Value> {
    let tools = state.mcp.discover_all().await;
    Json(json!({ "success": true, "toolCount": tools }))
}

/// `GET /mcp/settings`
pub async fn get_enabled_tools(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let enabled = SettingsRepo::new(state.db.clone())
        .get_json::<Vec<String>>(ENABLED_TOOLS_SETTING_KEY)?
        .unwrap_or_default();
    Ok(Json(json!({ "enabledTools": enabled })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnabledToolsBody {
    pub enabled_tools: Vec<String>,
}

/// `PUT /mcp/settings`: replace the saved enabled-tool list.
pub async fn set_enabled_tools(
    State(state): State<AppState>,
    Json(body): Json<EnabledToolsBody>,
) -> Result<Json<Value>, ApiError> {
    SettingsRepo::new(state.db.clone()).set_json(ENABLED_TOOLS_SETTING_KEY, &body.enabled_tools)?;
    Ok(Json(json!({ "success": true, "enabledTools": body.enabled_tools })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_settings::McpTransport;

    #[test]
    fn config_body_splits_off_the_name() {
        let (name, config) = parse_config(json!({
            "name": "browser",
            "type": "stdio",
            "command": "npx",
            "args": ["@playwright/mcp"],
            "modes": ["code"],
        }))
        .unwrap();
        assert_eq!(name.as_deref(), Some("browser"));
        assert!(matches!(
            config.transport,
            McpTransport::Stdio { ref command, .. } if command == "npx"
        ));
        assert_eq!(config.modes, vec!["code".to_string()]);
    }

    #[test]
    fn unknown_transport_is_a_bad_request() {
        let err = parse_config(json!({"name": "x", "type": "carrier-pigeon"})).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use conduit_engine::mcp_table::is_valid_name;
use conduit_store::CommandRepo;

use crate::error::ApiError;
use crate::server::AppState;

/// `GET /commands`
pub async fn list_commands(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let commands = CommandRepo::new(state.db.clone()).list()?;
    Ok(Json(json!({ "commands": commands })))
}

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub name: String,
    pub content: String,
}

/// `POST /commands`: register a fragment usable as `{{cmd:NAME}}`.
pub async fn create_command(
    State(state): State<AppState>,
    Json(body): Json<CommandBody>,
) -> Result<Json<Value>, ApiError> {
    let name = body.name.trim();
    if !is_valid_name(name) {
        return Err(ApiError::bad_request(
            "Name can only contain letters, numbers, _, and -.",
        ));
    }
    if body.content.trim().is_empty() {
        return Err(ApiError::bad_request("Content is required."));
    }
    let row = CommandRepo::new(state.db.clone()).create(name, &body.content)?;
    Ok(Json(json!(row)))
}

/// `DELETE /commands/{id}`
pub async fn delete_command(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if !CommandRepo::new(state.db.clone()).delete(id)? {
        return Err(ApiError::NotFound(format!("Command {id} not found.")));
    }
    Ok(Json(json!({ "success": true })))
}

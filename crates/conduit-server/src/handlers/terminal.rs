use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::server::AppState;
use crate::terminal::{run_terminal, TerminalStatus};

/// `GET /ws/terminal`: idle shells are reaped before the capacity check.
pub async fn terminal_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    state.terminals.reap_idle();
    let terminals = Arc::clone(&state.terminals);
    ws.on_upgrade(move |socket| run_terminal(socket, terminals))
}

/// `GET /terminal/status`
pub async fn terminal_status(State(state): State<AppState>) -> Json<TerminalStatus> {
    Json(state.terminals.status())
}

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinError;
use tracing::{debug, warn};

use conduit_core::OrchestratorError;

use super::{TerminalManager, TerminalSession, CAPACITY_CLOSE_CODE};

const OUTBOUND_QUEUE: usize = 64;

/// Serve one terminal socket until either side goes away.
pub async fn run_terminal(mut socket: WebSocket, terminals: Arc<TerminalManager>) {
    let (session, output) = match terminals.open().await {
        Ok(opened) => opened,
        Err(e @ OrchestratorError::TerminalCapacityExceeded { .. }) => {
            warn!(error = %e, "rejecting terminal connection");
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: CAPACITY_CLOSE_CODE,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "failed to open terminal");
            let _ = socket.send(error_frame(&e.to_string())).await;
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };
    let id = session.id().clone();
    let (mut ws_tx, ws_rx) = socket.split();

    let hello = json!({"type": "session_id", "id": id.as_str()}).to_string();
    if ws_tx.send(WsMessage::Text(hello.into())).await.is_err() {
        terminals.close(&id);
        return;
    }

    // Single writer; both loops and the final error report go through it.
    let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(OUTBOUND_QUEUE);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let mut relay = tokio::spawn(relay_output(
        Arc::clone(&session),
        output,
        out_tx.clone(),
        terminals.poll_interval(),
    ));
    let mut input = tokio::spawn(forward_input(
        ws_rx,
        Arc::clone(&session),
        terminals.default_size(),
    ));

    let outcome = tokio::select! {
        r = &mut relay => {
            input.abort();
            task_outcome(r)
        }
        r = &mut input => {
            relay.abort();
            task_outcome(r)
        }
    };

    terminals.close(&id);
    if let Err(reason) = outcome {
        warn!(terminal_id = %id, error = %reason, "terminal failed");
        let _ = out_tx.send(error_frame(&reason)).await;
    }
    let _ = out_tx.send(WsMessage::Close(None)).await;
    drop(out_tx);
    let _ = writer.await;
}

fn error_frame(reason: &str) -> WsMessage {
    let body = json!({"type": "error", "message": format!("Error: {reason}")});
    WsMessage::Text(body.to_string().into())
}

fn task_outcome(result: Result<Result<(), String>, JoinError>) -> Result<(), String> {
    match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Shell output to socket. Everything buffered since the last tick goes out
/// as one binary frame.
async fn relay_output(
    session: Arc<TerminalSession>,
    mut output: mpsc::UnboundedReceiver<Vec<u8>>,
    out: mpsc::Sender<WsMessage>,
    poll_interval: Duration,
) -> Result<(), String> {
    let mut tick = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = session.closed().cancelled() => return Ok(()),
            _ = tick.tick() => {}
        }

        let mut chunk = Vec::new();
        let mut ended = false;
        loop {
            match output.try_recv() {
                Ok(bytes) => chunk.extend_from_slice(&bytes),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    ended = true;
                    break;
                }
            }
        }

        if !chunk.is_empty() {
            session.touch();
            if out.send(WsMessage::Binary(chunk.into())).await.is_err() {
                return Ok(());
            }
        }
        if ended {
            debug!(terminal_id = %session.id(), "shell output ended");
            return Ok(());
        }
    }
}

/// Socket to shell. Resize requests are applied, everything else is typed.
async fn forward_input(
    mut ws_rx: SplitStream<WebSocket>,
    session: Arc<TerminalSession>,
    default_size: (u16, u16),
) -> Result<(), String> {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(terminal_id = %session.id(), error = %e, "socket read ended");
                return Ok(());
            }
        };
        session.touch();
        match msg {
            WsMessage::Text(text) => {
                if let Some((rows, cols)) = parse_resize(text.as_str(), default_size) {
                    if let Err(e) = session.resize(rows, cols) {
                        warn!(terminal_id = %session.id(), error = %e, "resize failed");
                    }
                    continue;
                }
                session.write(text.as_str().as_bytes()).map_err(|e| e.to_string())?;
            }
            WsMessage::Binary(bytes) => {
                session.write(&bytes).map_err(|e| e.to_string())?;
            }
            WsMessage::Close(_) => return Ok(()),
            _ => {}
        }
    }
    Ok(())
}

/// `{"type":"resize","rows":R,"cols":C}`; missing or out-of-range
/// dimensions take the default.
fn parse_resize(text: &str, default_size: (u16, u16)) -> Option<(u16, u16)> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "resize" {
        return None;
    }
    let dim = |key: &str, fallback: u16| {
        value
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(fallback)
    };
    Some((dim("rows", default_size.0), dim("cols", default_size.1)))
}

//! Client gateway: the viewer-facing HTTP/WebSocket server.
//!
//! `/ws` upgrades to a WebSocket. On connect the engine registers the viewer and
//! queues `initial_state` on its serialized path; a writer task then drains the
//! viewer's queue into the socket. Inbound text frames are parsed as control
//! messages; anything malformed is ignored for that viewer. When the engine
//! drops a viewer the connection is torn down, even if the peer stopped reading.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use jacques_protocol::ClientMessage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::broadcast::ClientId;
use crate::engine::{EngineHandle, ViewerCommand};
use crate::error::DaemonError;
use crate::settings;

/// How long a dropped viewer's writer may take to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct GatewayState {
    engine: EngineHandle,
    claude_settings_path: Arc<PathBuf>,
    /// Serializes settings read-modify-write across viewers.
    settings_lock: Arc<Mutex<()>>,
}

impl GatewayState {
    pub fn new(engine: EngineHandle, claude_settings_path: PathBuf) -> Self {
        Self {
            engine,
            claude_settings_path: Arc::new(claude_settings_path),
            settings_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/sessions", get(sessions))
        .with_state(state)
}

async fn health(State(state): State<GatewayState>) -> Response {
    match state.engine.snapshot().await {
        Ok(snapshot) => Json(serde_json::json!({
            "status": "ok",
            "pid": std::process::id(),
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": snapshot.sessions.len(),
            "clients": snapshot.client_count,
            "focused_session_id": snapshot.focused_session_id,
        }))
        .into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn sessions(State(state): State<GatewayState>) -> Response {
    match state.engine.snapshot().await {
        Ok(snapshot) => Json(serde_json::json!({
            "sessions": snapshot.sessions,
            "focused_session_id": snapshot.focused_session_id,
        }))
        .into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let subscription = match state.engine.connect().await {
        Ok(subscription) => subscription,
        Err(err) => {
            error!(error = %err, "Failed to register viewer");
            return;
        }
    };
    let client_id = subscription.client_id;
    let mut frames = subscription.frames;
    let mut closed = subscription.closed;

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if ws_tx.send(Message::Text(frame.as_ref().into())).await.is_err() {
                debug!(client_id, "WebSocket send failed, viewer disconnected");
                return;
            }
        }
        // Queue closed by the engine: slow viewer or shutdown.
        let _ = ws_tx.send(Message::Close(None)).await;
    });
    let mut writer_done = false;

    loop {
        tokio::select! {
            _ = &mut closed => {
                info!(client_id, "Viewer dropped by engine; closing connection");
                break;
            }
            _ = &mut send_task => {
                writer_done = true;
                break;
            }
            next = ws_rx.next() => {
                let text = match next {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!(client_id, error = %err, "WebSocket read error");
                        break;
                    }
                };

                let message: ClientMessage = match serde_json::from_str(text.as_str()) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(client_id, error = %err, "Ignoring malformed viewer message");
                        continue;
                    }
                };

                if handle_client_message(client_id, message, &state).await.is_err() {
                    break;
                }
            }
        }
    }

    state.engine.disconnect(client_id).await;
    if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
        debug!(client_id, "Viewer writer stuck; aborting");
        send_task.abort();
    }
    drop(ws_rx);
    info!(client_id, "Viewer connection closed");
}

async fn handle_client_message(
    client_id: ClientId,
    message: ClientMessage,
    state: &GatewayState,
) -> Result<(), DaemonError> {
    let command = match message {
        ClientMessage::ToggleAutocompact { session_id } => {
            return toggle_autocompact(client_id, session_id, state).await;
        }
        ClientMessage::SelectSession { session_id } => ViewerCommand::Select { session_id },
        ClientMessage::TriggerAction { session_id, action } => {
            ViewerCommand::TriggerAction { session_id, action }
        }
    };
    state.engine.control(client_id, command).await
}

/// Flips auto-compact and announces the result. Held under the settings lock so
/// concurrent toggles apply, and broadcast, one after another.
async fn toggle_autocompact(
    client_id: ClientId,
    session_id: Option<String>,
    state: &GatewayState,
) -> Result<(), DaemonError> {
    let _guard = state.settings_lock.lock().await;
    let path = Arc::clone(&state.claude_settings_path);
    let override_value = settings::threshold_override_from_env();
    let result = tokio::task::spawn_blocking(move || {
        settings::toggle_autocompact(&path, override_value.as_deref())
    })
    .await;

    match result {
        Ok(Ok(toggle)) => state.engine.autocompact_toggled(toggle, session_id).await,
        Ok(Err(err)) => {
            warn!(client_id, error = %err, "Failed to toggle auto-compact");
            Ok(())
        }
        Err(err) => {
            error!(client_id, error = %err, "Auto-compact toggle task failed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    #[tokio::test]
    async fn concurrent_toggles_apply_one_after_another() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("settings.json");
        fs_err::write(&path, r#"{"autoCompact": true, "theme": "dark"}"#).unwrap();

        let (engine, _task) = Engine::new(16).spawn(16);
        let mut viewer = engine.connect().await.unwrap();
        viewer.frames.recv().await.unwrap();
        let state = GatewayState::new(engine.clone(), path.clone());
        let client_id = viewer.client_id;

        let toggles = (0..4).map(|_| {
            let state = state.clone();
            tokio::spawn(async move {
                handle_client_message(
                    client_id,
                    ClientMessage::ToggleAutocompact { session_id: None },
                    &state,
                )
                .await
            })
        });
        for toggle in futures::future::join_all(toggles).await {
            toggle.unwrap().unwrap();
        }

        let mut announced = Vec::new();
        for _ in 0..4 {
            let frame = viewer.frames.recv().await.unwrap();
            let message: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(message["type"], "autocompact_toggled");
            announced.push(message["enabled"].as_bool().unwrap());
        }
        assert_eq!(announced, vec![false, true, false, true]);

        let written: serde_json::Value =
            serde_json::from_str(&fs_err::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["autoCompact"], true);
        assert_eq!(written["theme"], "dark");
    }
}

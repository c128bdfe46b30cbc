use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::session::{ClientMessage, ServerMessage};
use super::state::DashboardState;

/// Axum handler that upgrades an HTTP request to a WebSocket connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DashboardState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// One browser client: attaches a view on every pane, forwards the
/// session's messages to the socket and the client's events to the session.
async fn handle_socket(socket: WebSocket, state: Arc<DashboardState>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let client = uuid::Uuid::new_v4().to_string();

    if let Err(e) = state.session.connect(&client, out_tx.clone()) {
        if let Some(logger) = &state.logger {
            let _ = logger.log_error(&format!("client {} rejected: {}", client, e));
        }
        return;
    }

    // Task: forward session messages → WebSocket client
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&message) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break; // client disconnected
                }
            }
        }
    });

    // Task: read client events and hand them to the session
    let session = state.session.clone();
    let recv_client = client.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        if session
                            .event(&recv_client, message.pane, message.payload)
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = out_tx.send(ServerMessage::Error {
                            message: format!("Invalid client message: {}", e),
                        });
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish, then abort the other to prevent leaks
    tokio::select! {
        _ = &mut send_task => { recv_task.abort(); },
        _ = &mut recv_task => { send_task.abort(); },
    }

    let _ = state.session.disconnect(&client);
}

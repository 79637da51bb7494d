//! Live order push over WebSocket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use broadcast::{PushMessage, SessionRegistry};
use futures_util::{SinkExt, StreamExt};
use order_store::OrderStore;
use tokio::sync::mpsc;

use crate::AppState;

/// GET /ws/{sid}
pub async fn connect<S: OrderStore + 'static>(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState<S>>>,
) -> Response {
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, sessions))
}

async fn handle_socket(socket: WebSocket, session_id: String, sessions: Arc<SessionRegistry>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<PushMessage>();
    let conn_id = sessions.add(session_id.clone(), tx);
    metrics::gauge!("broadcast_sessions").set(sessions.len() as f64);

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode push message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Clients only send keep-alives; anything else is ignored.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    sessions.remove(&session_id, conn_id);
    metrics::gauge!("broadcast_sessions").set(sessions.len() as f64);
}

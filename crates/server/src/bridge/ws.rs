//! WebSocket shell: one full-duplex JSON-frame session per client.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use super::SessionBridge;
use crate::protocol::{ClientMessage, ServerMessage};

pub fn router(bridge: Arc<SessionBridge>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(bridge)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(bridge): State<Arc<SessionBridge>>,
) -> Response {
    let token = params.get("token").cloned().unwrap_or_default();
    match bridge.authenticate(&token) {
        Ok(user_id) => ws
            .on_upgrade(move |socket| handle_socket(bridge, user_id, socket))
            .into_response(),
        Err(_) => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn handle_socket(bridge: Arc<SessionBridge>, user_id: i64, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let mut rx = bridge.register_client(user_id);

    // Writer half: drain the bounded per-client channel onto the wire.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => bridge.handle_message(user_id, msg).await,
                Err(err) => {
                    debug!(user_id, %err, "unparseable frame");
                    bridge.send_to(
                        user_id,
                        ServerMessage::Error {
                            message: format!("invalid frame: {err}"),
                        },
                    );
                }
            },
            Message::Close(_) => break,
            // Pings are answered at the protocol level; transport-level
            // ping/pong is handled by axum itself.
            _ => {}
        }
    }

    writer.abort();
    bridge.unregister_client(user_id);
}

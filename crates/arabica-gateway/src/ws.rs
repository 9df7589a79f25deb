//! WebSocket endpoint for the employee chat presence layer.
//!
//! Protocol (JSON text frames, `type` discriminator):
//! → Client sends: {"type":"typing_start","chatId":"c1"}
//! → Client sends: {"type":"typing_stop","chatId":"c1"}
//! → Client sends: {"type":"subscribe_chat","chatId":"c1"}
//! → Client sends: {"type":"get_online_users"} / {"type":"ping"}
//! ← Server sends: {"type":"connected","identity":"...","timestamp":"..."}
//! ← Server sends: {"type":"online_status","identity":"...","isOnline":true,...}
//! ← Server sends: {"type":"typing","chatId":"c1","identity":"...","isTyping":true,...}
//! ← Server sends: {"type":"online_users_list","users":[...],...} / {"type":"pong",...}
//!
//! Liveness: a transport ping every heartbeat interval. A deadline of
//! connection timeout is re-armed on every pong; when it fires the socket is
//! dropped without a close frame.

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};

use super::presence::{ClientMessage, ServerEvent, normalize_identity};
use super::server::AppState;

/// Close code sent when the handshake carries no identity.
pub const CLOSE_IDENTITY_REQUIRED: u16 = 4001;

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub phone: Option<String>,
    pub identity: Option<String>,
}

/// WebSocket upgrade handler for `/ws/employee-chat`.
pub async fn employee_chat_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<ChatQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let raw = query.phone.or(query.identity).unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, state, raw))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, raw_identity: String) {
    if normalize_identity(&raw_identity).is_none() {
        tracing::warn!("❌ Chat socket without identity, refused");
        let frame = CloseFrame {
            code: CLOSE_IDENTITY_REQUIRED,
            reason: Utf8Bytes::from_static("Phone required"),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }
    let Ok((conn, mut outbound)) = state.presence.connect(&raw_identity) else {
        return;
    };

    let heartbeat = state.heartbeat;
    let timeout = state.connection_timeout;
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let liveness = tokio::time::sleep(timeout);
    tokio::pin!(liveness);

    loop {
        tokio::select! {
            event = outbound.recv() => match event {
                Some(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Coordinator shut down.
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(message) => state.presence.handle_message(&conn, message),
                    Err(e) => tracing::debug!(identity = %conn.identity, "Ignoring chat frame: {e}"),
                },
                Some(Ok(Message::Pong(_))) => {
                    liveness.as_mut().reset(Instant::now() + timeout);
                    state.presence.touch(&conn.identity);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(identity = %conn.identity, "Chat socket error: {e}");
                    break;
                }
            },
            _ = ticker.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            () = &mut liveness => {
                tracing::warn!(identity = %conn.identity, "⏰ Chat socket heartbeat timeout, terminating");
                break;
            }
        }
    }

    state.presence.disconnect(&conn);
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(event).map_err(|e| {
        tracing::error!("WS encode failed: {e}");
    })?;
    sender.send(Message::Text(json.into())).await.map_err(|e| {
        tracing::debug!("WS send failed: {e}");
    })
}

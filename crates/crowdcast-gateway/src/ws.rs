//! Push-channel handling.
//!
//! One task per connection. The client gets `subscribe_timeout_s` to send
//! `{"type":"subscribe","room_id":…}`; anything else (timeout, malformed
//! JSON, wrong shape) silently falls back to the default room. After the
//! `subscribed` ack, inbound frames are read and ignored — they only matter
//! as a disconnect signal.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info};

use crate::app::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_client(socket, state))
}

fn subscribe_room(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "subscribe" {
        return None;
    }
    value.get("room_id")?.as_str().map(str::to_string)
}

async fn handle_client(socket: WebSocket, state: Arc<AppState>) {
    let (mut tx, mut rx) = socket.split();
    let mut room = state.settings.default_room.clone();

    let timeout = Duration::from_secs_f64(state.settings.subscribe_timeout_s);
    match tokio::time::timeout(timeout, rx.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            if let Some(requested) = subscribe_room(&text) {
                room = requested;
            }
        }
        _ => debug!(room, "subscribe handshake defaulted"),
    }

    let (conn_id, mut deliver_rx) = state.fanout.subscribe(&room);
    let ack = json!({"type": "subscribed", "room_id": room}).to_string();
    if tx.send(Message::Text(ack.into())).await.is_err() {
        state.fanout.unsubscribe(&room, conn_id);
        return;
    }

    loop {
        tokio::select! {
            payload = deliver_rx.recv() => {
                match payload {
                    Some(payload) => {
                        if tx.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // inbound frames are ignored; errors and close mean disconnect
            frame = rx.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.fanout.unsubscribe(&room, conn_id);
    info!(room, conn_id, "push channel closed");
}

#[cfg(test)]
mod tests {
    use super::subscribe_room;

    #[test]
    fn well_formed_subscribe_extracts_room() {
        let text = r#"{"type":"subscribe","room_id":"room:speedrun"}"#;
        assert_eq!(subscribe_room(text).as_deref(), Some("room:speedrun"));
    }

    #[test]
    fn malformed_payloads_fall_back() {
        assert!(subscribe_room("not json").is_none());
        assert!(subscribe_room(r#"{"type":"hello"}"#).is_none());
        assert!(subscribe_room(r#"{"type":"subscribe","room_id":7}"#).is_none());
        assert!(subscribe_room(r#"{"room_id":"room:x"}"#).is_none());
    }
}

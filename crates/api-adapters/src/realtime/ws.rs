//! WebSocket front of the room hub: `GET /ws[?token=…]`.
//!
//! Authenticated sockets are placed in their `user:<id>` room. Clients
//! subscribe to post rooms with `join_post` / `leave_post` frames.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use bytes::Bytes;
use domains::{RealtimeEvent, Room};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hub::ConnectionId;
use crate::state::AppState;

pub const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    JoinPost {
        #[serde(rename = "postId")]
        post_id: Uuid,
    },
    LeavePost {
        #[serde(rename = "postId")]
        post_id: Uuid,
    },
    Authenticate {
        token: String,
    },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let id: ConnectionId = Uuid::new_v4();
    let mut outbound = state.hub.connect(id);
    if let Some(token) = token {
        authenticate(&state, id, &token).await;
    }

    let (mut sender, mut receiver) = socket.split();
    let mut ping = interval(PING_INTERVAL);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_frame(&state, id, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(connection_id = %id, error = %e, "socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = ping.tick() => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.disconnect(id);
}

async fn handle_frame(state: &AppState, id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::JoinPost { post_id }) => state.hub.join(id, Room::Post(post_id)),
        Ok(ClientFrame::LeavePost { post_id }) => state.hub.leave(id, Room::Post(post_id)),
        Ok(ClientFrame::Authenticate { token }) => authenticate(state, id, &token).await,
        Err(e) => {
            debug!(connection_id = %id, error = %e, "unrecognised frame");
            reply(state, id, "error", json!({ "message": "unrecognised frame" }));
        }
    }
}

async fn authenticate(state: &AppState, id: ConnectionId, token: &str) {
    match state.services.users.authenticate(token).await {
        Ok(principal) => {
            state.hub.identify(id, Some(principal.id));
            info!(connection_id = %id, user_id = %principal.id, "socket authenticated");
            reply(state, id, "authenticated", json!({ "userId": principal.id }));
        }
        Err(e) => {
            state.hub.identify(id, None);
            debug!(connection_id = %id, error = %e, "socket authentication failed");
            reply(state, id, "error", json!({ "message": "authentication failed" }));
        }
    }
}

fn reply(state: &AppState, id: ConnectionId, event: &str, data: serde_json::Value) {
    let sent = RealtimeEvent::new(event, &data).and_then(|e| state.hub.send_to(id, &e));
    if let Err(e) = sent {
        warn!(connection_id = %id, error = %e, "failed to reply on socket");
    }
}

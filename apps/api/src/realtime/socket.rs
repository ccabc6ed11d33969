//! `GET /ws?token=<jwt>`. The token is checked before the upgrade; after that the
//! connection is a loop over its registry outbox and incoming client frames.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::realtime::events::{validate_chat_text, validate_room, ClientEvent, ServerEvent};
use crate::realtime::fanout::{Envelope, Fanout};
use crate::realtime::registry::{ConnId, ConnectionRegistry};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SocketAuth {
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /ws
pub async fn handle_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(auth): Query<SocketAuth>,
) -> Result<Response, AppError> {
    let token = auth.token.ok_or(AppError::Unauthorized)?;
    let claims = state.jwt.verify(&token)?;
    let user_id = claims.sub;
    Ok(ws.on_upgrade(move |socket| run_connection(socket, state, user_id)))
}

async fn run_connection(mut socket: WebSocket, state: AppState, user_id: Uuid) {
    let (conn_id, mut outbox) = state.registry.register(user_id);
    info!(
        user_id = %user_id,
        conn_id,
        connections = state.registry.connection_count(user_id),
        "Socket connected"
    );

    'conn: loop {
        tokio::select! {
            event = outbox.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(user_id = %user_id, conn_id, "Socket read error: {e}");
                        break;
                    }
                };
                let replies = handle_client_message(
                    &text,
                    conn_id,
                    user_id,
                    &state.registry,
                    state.fanout.as_ref(),
                )
                .await;
                for reply in &replies {
                    if send_event(&mut socket, reply).await.is_err() {
                        break 'conn;
                    }
                }
            }
        }
    }

    state.registry.unregister(conn_id);
    info!(user_id = %user_id, conn_id, "Socket disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            warn!("Failed to serialize socket event: {e}");
            return Ok(());
        }
    };
    socket.send(Message::Text(payload)).await.map_err(|_| ())
}

fn error_event(message: impl Into<String>) -> ServerEvent {
    ServerEvent::Error {
        message: message.into(),
    }
}

/// Applies one client frame. Returns the events that go back to the sender only;
/// chat messages reach the room (sender included) through the fan-out.
pub async fn handle_client_message(
    text: &str,
    conn_id: ConnId,
    user_id: Uuid,
    registry: &ConnectionRegistry,
    fanout: &dyn Fanout,
) -> Vec<ServerEvent> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => return vec![error_event(format!("Invalid message: {e}"))],
    };

    match event {
        ClientEvent::Ping => vec![ServerEvent::Pong],
        ClientEvent::Join { room } => {
            if let Err(msg) = validate_room(&room) {
                return vec![error_event(msg)];
            }
            registry.join(conn_id, &room);
            debug!(user_id = %user_id, room = %room, "Joined room");
            vec![ServerEvent::Joined { room }]
        }
        ClientEvent::Leave { room } => {
            registry.leave(conn_id, &room);
            vec![ServerEvent::Left { room }]
        }
        ClientEvent::Chat { room, text } => {
            if !registry.is_member(conn_id, &room) {
                return vec![error_event(format!("Join '{room}' before sending to it"))];
            }
            let text = match validate_chat_text(&text) {
                Ok(t) => t.to_string(),
                Err(msg) => return vec![error_event(msg)],
            };
            let event = ServerEvent::Chat {
                room: room.clone(),
                from: user_id,
                text,
                sent_at: Utc::now(),
            };
            fanout.publish(Envelope::to_room(room, event)).await;
            Vec::new()
        }
    }
}

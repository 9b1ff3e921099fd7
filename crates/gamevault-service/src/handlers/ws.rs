//! Realtime websocket.
//!
//! A connection joins the caller's player room and the global room, then
//! forwards every effect published to either as a JSON text frame.
//! Browsers cannot set headers on websocket requests, so the bearer token
//! may also be passed as `?token=`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use gamevault_core::{Channel, UserId};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::realtime::RealtimeHub;
use crate::state::AppState;

/// Websocket query parameters.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token, when no `authorization` header can be sent.
    #[serde(default)]
    pub token: Option<String>,
}

/// Upgrade to a websocket subscribed to the caller's rooms.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or(query.token)
        .ok_or(ApiError::Unauthorized)?;
    let user = authenticate(&token, &state).await?;

    let hub = Arc::clone(&state.hub);
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, hub, user.user_id)))
}

async fn serve_socket(socket: WebSocket, hub: Arc<RealtimeHub>, user_id: UserId) {
    let mut player = hub.subscribe(Channel::Player(user_id));
    let mut global = hub.subscribe(Channel::Global);
    let (mut sink, mut stream) = socket.split();

    tracing::debug!(user_id = %user_id, "Websocket connected");

    loop {
        let received = tokio::select! {
            received = player.recv() => received,
            received = global.recv() => received,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };
        let message = match received {
            Ok(message) => message,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(user_id = %user_id, skipped, "Websocket client lagging, effects skipped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if sink.send(Message::Text(message.to_string())).await.is_err() {
            break;
        }
    }

    tracing::debug!(user_id = %user_id, "Websocket disconnected");
}

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::dispatcher::SessionDispatcher;
use crate::models::{ClientMeta, ErrorResponse, Identity};
use crate::services::auth_service::get_auth_token;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket handler. The credential is verified before the upgrade, so a
/// refused client never reaches event routing.
pub async fn websocket_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    info!("New WebSocket connection attempt");

    let identity = match get_auth_token(&headers, query.token.as_deref()) {
        Ok(token) => state.dispatcher.authenticate(&token).await,
        Err(e) => Err(e),
    };
    let identity = match identity {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Socket authentication error: {}", e);
            let status = StatusCode::UNAUTHORIZED;
            return (
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    let meta = ClientMeta {
        ip_address: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
    };

    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, identity, meta))
}

/// Handle WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    dispatcher: Arc<SessionDispatcher>,
    identity: Identity,
    meta: ClientMeta,
) {
    let (mut session, mut outbound) = dispatcher.open(identity, meta);
    let connection_id = session.connection().id.clone();

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    // Drain the connection's outbound queue into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are handled one at a time, each to completion
    let recv = async {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => dispatcher.dispatch_text(&mut session, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Socket error on {}: {}", connection_id, e);
                    break;
                }
            }
        }
    };

    // Wait for either side to finish
    tokio::select! {
        _ = recv => {},
        _ = (&mut send_task) => {},
    };
    send_task.abort();

    dispatcher.disconnect(&mut session);
    info!("WebSocket connection terminated");
}

//! WebSocket gateway: one task per socket, bridging frames to the router.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::protocol::{ClientEvent, ServerEvent};
use parley_shared::types::UserId;

use crate::api::{caller_id, AppState};
use crate::router::RouterHandle;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// The handshake must carry the identity header; the socket is bound to
/// that identity for its whole life.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let identity = match caller_id(&headers, &state.config) {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "WebSocket handshake rejected");
            return e.into_response();
        }
    };
    let router = state.router.clone();
    let buffer = state.config.outbound_buffer.max(1);
    ws.on_upgrade(move |socket| handle_socket(socket, router, identity, buffer))
}

async fn handle_socket(socket: WebSocket, router: RouterHandle, identity: UserId, buffer: usize) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(buffer);
    let connection = match router.connect(identity.clone(), outbound_tx).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "Refusing socket, router unavailable");
            return;
        }
    };
    info!(connection = %connection, user = %identity.short(), "WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match ClientEvent::from_json(&text) {
                    Ok(event) => {
                        if router.dispatch(connection, event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection = %connection, error = %e, "Malformed frame dropped");
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection = %connection, "Binary frame dropped");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection = %connection, error = %e, "WebSocket read failed");
                    break;
                }
            },
            outgoing = outbound_rx.recv() => match outgoing {
                Some(event) => match event.to_json() {
                    Ok(json) => {
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(connection = %connection, error = %e, "Failed to encode event"),
                },
                None => {
                    // Router released the connection (e.g. connection limit).
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    router.disconnect(connection).await;
    info!(connection = %connection, "WebSocket disconnected");
}

//! Realtime transport: a duplex stream of protocol frames.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use parley_shared::protocol::{ClientEvent, ServerEvent};
use parley_shared::types::UserId;
use parley_shared::ProtocolError;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<()>;

    async fn send(&mut self, event: &ClientEvent) -> Result<()>;

    /// Next inbound frame. `None` means the connection is gone.
    async fn next_event(&mut self) -> Option<Result<ServerEvent>>;

    fn is_connected(&self) -> bool;

    async fn close(&mut self);
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    url: String,
    credentials: Option<(String, UserId)>,
    socket: Option<Socket>,
}

impl WsTransport {
    pub fn new(config: &ClientConfig, identity: UserId) -> Self {
        Self {
            url: config.ws_url(),
            credentials: config
                .with_credentials
                .then(|| (config.identity_header.clone(), identity)),
            socket: None,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some((header, identity)) = &self.credentials {
            let name = HeaderName::from_bytes(header.as_bytes())
                .map_err(|e| ClientError::Transport(format!("Bad identity header: {e}")))?;
            let value = HeaderValue::from_str(identity.as_str())
                .map_err(|e| ClientError::Transport(format!("Bad identity value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        info!(url = %self.url, "Realtime transport connected");
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(ClientError::NotConnected)?;
        let json = event.to_json()?;
        if let Err(e) = socket.send(WsMessage::text(json)).await {
            self.socket = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        loop {
            let socket = self.socket.as_mut()?;
            let frame = match socket.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    debug!(error = %e, "Realtime read failed");
                    self.socket = None;
                    return None;
                }
                None => {
                    self.socket = None;
                    return None;
                }
            };

            match frame {
                WsMessage::Text(text) => {
                    return Some(ServerEvent::from_json(text.as_str()).map_err(Into::into));
                }
                WsMessage::Close(_) => {
                    debug!("Server closed realtime connection");
                    self.socket = None;
                    return None;
                }
                WsMessage::Binary(_) => {
                    warn!("Unexpected binary frame");
                    return Some(Err(ProtocolError::UnsupportedFrame.into()));
                }
                // Ping/pong are answered by tungstenite itself.
                _ => continue,
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut transport =
            WsTransport::new(&ClientConfig::default(), UserId::parse("alice").unwrap());
        assert!(!transport.is_connected());
        let err = transport
            .send(&ClientEvent::JoinRoom(UserId::parse("alice").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert!(transport.next_event().await.is_none());
    }
}

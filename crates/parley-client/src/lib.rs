//! # parley-client
//!
//! Realtime client adapter for Parley conversations.
//!
//! One [`ChatClient`] per signed-in session combines:
//! - a realtime [`Transport`] (WebSocket by default) for optimistic message
//!   echo and typing notices
//! - a durable [`MessageApi`] (REST by default) that every send is also
//!   written through, and that history and unread counts are read from
//! - local [`Timeline`]s with provisional/confirmed/failed display state, a
//!   [`ConversationList`] and typing state
//!
//! Reconnects use capped exponential backoff and always trigger a full
//! resync, since the realtime path is allowed to drop events.

pub mod api;
pub mod config;
pub mod conversations;
pub mod error;
pub mod retry;
pub mod session;
pub mod timeline;
pub mod transport;
pub mod typing;

pub use api::{HttpMessageApi, MessageApi};
pub use config::ClientConfig;
pub use conversations::{ConversationEntry, ConversationList};
pub use error::{ClientError, Result};
pub use retry::RetryPolicy;
pub use session::{ChatClient, ClientHandle, ClientNotification, ConnectionState};
pub use timeline::{DisplayState, LocalMessage, Timeline};
pub use transport::{Transport, WsTransport};
pub use typing::{TypingAction, TypingEmitter, TypingIndicator};

use parley_shared::types::{SenderRole, UserId};

/// Session over the real HTTP and WebSocket backends. Does not connect.
pub fn http_session(
    config: ClientConfig,
    me: UserId,
    role: SenderRole,
) -> Result<ChatClient<HttpMessageApi, WsTransport>> {
    let api = HttpMessageApi::new(&config, me.clone())?;
    let transport = WsTransport::new(&config, me.clone());
    Ok(ChatClient::new(config, me, role, api, transport))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_session_starts_idle() {
        let config = ClientConfig::new("http://127.0.0.1:9");
        let me = UserId::parse("lawyer-7").unwrap();
        let client = http_session(config, me.clone(), SenderRole::Lawyer).unwrap();
        assert_eq!(client.state(), ConnectionState::Idle);
        assert_eq!(client.me(), &me);
        assert!(client.conversations().entries().is_empty());
    }
}

//! Client adapter configuration.

use std::time::Duration;

use parley_shared::constants::{
    DEFAULT_IDENTITY_HEADER, MAX_MESSAGE_CHARS, TYPING_EXPIRY_MS, TYPING_IDLE_TIMEOUT_MS,
    TYPING_RENEW_INTERVAL_MS, WS_PATH,
};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, e.g. `https://chat.example.com`.
    pub base_url: String,

    /// Never true by default: constructing a client must not dial anything.
    pub auto_connect: bool,

    /// Attach the identity header to every REST request and the socket
    /// handshake.
    pub with_credentials: bool,

    pub identity_header: String,

    /// Keyboard inactivity before `stopTyping` is emitted.
    pub typing_idle: Duration,

    /// Minimum spacing between repeated `typing` emissions.
    pub typing_renew: Duration,

    /// A peer's typing indicator clears if not renewed within this window.
    pub typing_expiry: Duration,

    /// Conversation list polling interval.
    pub refresh_interval: Duration,

    pub reconnect: RetryPolicy,

    pub max_message_chars: usize,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auto_connect: false,
            with_credentials: true,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            typing_idle: Duration::from_millis(TYPING_IDLE_TIMEOUT_MS),
            typing_renew: Duration::from_millis(TYPING_RENEW_INTERVAL_MS),
            typing_expiry: Duration::from_millis(TYPING_EXPIRY_MS),
            refresh_interval: Duration::from_secs(30),
            reconnect: RetryPolicy::default(),
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }

    /// WebSocket URL derived from the REST base URL.
    pub fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}{WS_PATH}")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8080")
    }
}

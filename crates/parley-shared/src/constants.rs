/// Application name
pub const APP_NAME: &str = "Parley";

/// Maximum message body length in characters
pub const MAX_MESSAGE_CHARS: usize = 4_000;

/// Conversation list previews are cut to this many characters
pub const PREVIEW_MAX_CHARS: usize = 60;

/// Longest accepted user id, in characters
pub const MAX_USER_ID_CHARS: usize = 128;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Path of the realtime WebSocket endpoint
pub const WS_PATH: &str = "/ws";

/// Header carrying the caller identity set by the upstream auth layer
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";

/// Sender emits `stopTyping` after this much keyboard inactivity
pub const TYPING_IDLE_TIMEOUT_MS: u64 = 1_000;

/// Sender re-emits `typing` at most this often while keys keep coming
pub const TYPING_RENEW_INTERVAL_MS: u64 = 2_000;

/// Receiver clears a typing indicator not renewed within this window
pub const TYPING_EXPIRY_MS: u64 = 5_000;

/// Maximum concurrent realtime connections per identity
pub const MAX_CONNECTIONS_PER_USER: usize = 5;

/// Per-connection outbound queue depth
pub const OUTBOUND_BUFFER: usize = 256;

/// Hard cap for one history page
pub const MAX_PAGE_SIZE: u32 = 500;

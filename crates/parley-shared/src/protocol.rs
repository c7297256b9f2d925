use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{DeliveryStatus, SenderRole, UserId};

/// Frames a client sends over the realtime channel.
///
/// Encoded as `{"event": "<name>", "data": <payload>}` JSON text frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to an identity's room
    JoinRoom(UserId),

    /// Optimistic chat message, fanned out without touching storage
    SendMessage(ChatPayload),

    /// Sender started (or is still) typing
    Typing(TypingPayload),

    /// Sender stopped typing
    StopTyping(TypingPayload),
}

/// Frames the server pushes to a joined connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage(ChatPayload),
    Typing(TypingNotice),
    StopTyping(TypingNotice),
}

/// Chat message as carried on the realtime path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub receiver_id: UserId,
    pub sender_role: SenderRole,
}

/// What the receiver learns about someone typing to them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub sender_role: SenderRole,
    pub sender_id: UserId,
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "joinRoom",
            Self::SendMessage(_) => "sendMessage",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receiveMessage",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
        }
    }
}

// ---------------------------------------------------------------------------
// REST bodies
// ---------------------------------------------------------------------------

/// `POST /messages/send`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: UserId,
    pub message: String,
}

/// `PATCH /messages/conversation/{counterpartId}/read`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkReadResponse {
    pub updated: usize,
}

/// `GET /presence/{userId}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: UserId,
    pub online: bool,
    pub connections: usize,
}

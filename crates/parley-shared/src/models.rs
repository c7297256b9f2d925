//! Domain records exchanged between the store, the server and clients.
//!
//! Field names follow the JSON the web clients already speak (`senderId`,
//! `message`, `timestamp`, ...), so every struct is `camelCase` on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_PAGE_SIZE;
use crate::types::{DeliveryStatus, MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single persisted chat message between two parties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    /// Store-assigned insertion sequence; doubles as the history cursor.
    pub seq: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Body text, already trimmed.
    #[serde(rename = "message")]
    pub text: String,
    /// Assigned by the store at append time, never changed afterwards.
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub read: bool,
}

// ---------------------------------------------------------------------------
// Conversation summary
// ---------------------------------------------------------------------------

/// One row of a user's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub counterpart_id: UserId,
    pub last_message_id: MessageId,
    pub last_sender_id: UserId,
    /// Truncated body of the most recent message.
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Forward cursor over a conversation's history, oldest first.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Only return messages with `seq` strictly greater than this.
    pub after: Option<i64>,
    /// Page size; `None` returns everything that remains.
    pub limit: Option<u32>,
}

impl PageRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn first(limit: u32) -> Self {
        Self {
            after: None,
            limit: Some(limit),
        }
    }

    /// Effective limit, clamped to `1..=MAX_PAGE_SIZE` when one was given.
    pub fn bounded_limit(&self) -> Option<u32> {
        self.limit.map(|l| l.clamp(1, MAX_PAGE_SIZE))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Cursor for the next page, `None` once history is exhausted.
    pub next: Option<i64>,
}

//! Raw message queries. Validation and cache upkeep live in
//! [`MessageStore`](crate::MessageStore); these helpers only talk SQL.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use parley_shared::models::{Message, MessagePage, PageRequest};
use parley_shared::types::{DeliveryStatus, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str =
    "seq, id, sender_id, receiver_id, body, created_at, status, is_read";

/// Timestamps are stored with a fixed width so that text order is time order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    /// Insert a fully built message and return the sequence number SQLite
    /// assigned to it.
    pub fn insert_message(&self, message: &Message) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, body, created_at, status, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.0.to_string(),
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.text,
                format_ts(&message.timestamp),
                message.status.as_str(),
                message.read,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Messages exchanged between `a` and `b` in either direction, oldest first.
    pub fn get_conversation(&self, a: &UserId, b: &UserId, page: PageRequest) -> Result<MessagePage> {
        let limit = page.bounded_limit();
        // One extra row tells us whether another page exists.
        let fetch_limit: i64 = limit.map(|l| i64::from(l) + 1).unwrap_or(-1);

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2)
                 OR (sender_id = ?2 AND receiver_id = ?1))
               AND seq > ?3
             ORDER BY seq ASC
             LIMIT ?4"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![a.as_str(), b.as_str(), page.after.unwrap_or(0), fetch_limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        let next = match limit {
            Some(l) if messages.len() > l as usize => {
                messages.truncate(l as usize);
                messages.last().map(|m| m.seq)
            }
            _ => None,
        };

        Ok(MessagePage { messages, next })
    }

    pub fn get_message_by_id(&self, id: MessageId) -> Result<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id.0.to_string()], row_to_message)
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// Flag every unread message `counterpart` sent to `reader` as read.
    ///
    /// Reading implies the message reached the receiver, so the status is
    /// promoted to `delivered` in the same statement.
    pub fn mark_messages_read(&self, reader: &UserId, counterpart: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET is_read = 1, status = 'delivered'
             WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
            params![reader.as_str(), counterpart.as_str()],
        )?;
        Ok(affected)
    }

    /// Direct count of unread messages `counterpart` sent to `reader`.
    pub fn count_unread(&self, reader: &UserId, counterpart: &UserId) -> Result<u32> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
            params![reader.as_str(), counterpart.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn parse_user(idx: usize, raw: String) -> rusqlite::Result<UserId> {
    UserId::parse(raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn parse_message_id(idx: usize, raw: &str) -> rusqlite::Result<MessageId> {
    Uuid::parse_str(raw)
        .map(MessageId)
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let seq: i64 = row.get(0)?;
    let id_str: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let receiver: String = row.get(3)?;
    let text: String = row.get(4)?;
    let ts_str: String = row.get(5)?;
    let status: String = row.get(6)?;
    let read: bool = row.get(7)?;

    Ok(Message {
        id: parse_message_id(1, &id_str)?,
        seq,
        sender_id: parse_user(2, sender)?,
        receiver_id: parse_user(3, receiver)?,
        text,
        timestamp: parse_ts(5, &ts_str)?,
        status: DeliveryStatus::from_str_lossy(&status),
        read,
    })
}

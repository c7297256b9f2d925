//! Conversation list aggregation.
//!
//! Conversations have no table of their own; this recomputes every
//! summary for a user straight from `messages`, so unread counts can
//! never drift from the rows they describe.

use rusqlite::params;

use parley_shared::constants::PREVIEW_MAX_CHARS;
use parley_shared::models::ConversationSummary;
use parley_shared::types::UserId;
use parley_shared::validation::preview;

use crate::database::Database;
use crate::error::Result;
use crate::messages::{parse_message_id, parse_ts, parse_user};

const SUMMARY_SQL: &str = r#"
WITH mine AS (
    SELECT seq, id, sender_id, body, created_at,
           CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS counterpart
    FROM messages
    WHERE sender_id = ?1 OR receiver_id = ?1
),
ranked AS (
    SELECT *,
           ROW_NUMBER() OVER (PARTITION BY counterpart ORDER BY seq DESC) AS rn
    FROM mine
)
SELECT r.counterpart, r.id, r.sender_id, r.body, r.created_at,
       (SELECT COUNT(*) FROM messages u
         WHERE u.receiver_id = ?1 AND u.sender_id = r.counterpart AND u.is_read = 0)
FROM ranked r
WHERE r.rn = 1
ORDER BY r.seq DESC
"#;

impl Database {
    /// One summary per counterpart, most recent conversation first.
    pub fn conversation_summaries(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(SUMMARY_SQL)?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            let counterpart: String = row.get(0)?;
            let id_str: String = row.get(1)?;
            let sender: String = row.get(2)?;
            let body: String = row.get(3)?;
            let ts_str: String = row.get(4)?;
            let unread: u32 = row.get(5)?;

            Ok(ConversationSummary {
                counterpart_id: parse_user(0, counterpart)?,
                last_message_id: parse_message_id(1, &id_str)?,
                last_sender_id: parse_user(2, sender)?,
                last_message: preview(&body, PREVIEW_MAX_CHARS),
                last_message_at: parse_ts(4, &ts_str)?,
                unread_count: unread,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

//! v002 -- Partial index backing unread counts and mark-read.

use rusqlite::Connection;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_messages_unread
             ON messages(receiver_id, sender_id) WHERE is_read = 0;",
    )
}

//! v001 -- Initial schema creation.
//!
//! A single append-only `messages` table. Conversations are not stored;
//! they are aggregated from this table on demand.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT, -- insertion order, history cursor
    id          TEXT NOT NULL UNIQUE,              -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    body        TEXT NOT NULL,
    created_at  TEXT NOT NULL,                     -- RFC-3339, fixed micros precision
    status      TEXT NOT NULL DEFAULT 'sent',      -- 'sent' | 'delivered'
    is_read     INTEGER NOT NULL DEFAULT 0,        -- boolean 0/1

    CHECK (sender_id <> receiver_id),
    CHECK (length(trim(body)) > 0)
);

CREATE INDEX IF NOT EXISTS idx_messages_sender_receiver
    ON messages(sender_id, receiver_id, seq);

CREATE INDEX IF NOT EXISTS idx_messages_receiver_sender
    ON messages(receiver_id, sender_id, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

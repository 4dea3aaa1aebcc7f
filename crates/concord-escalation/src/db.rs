use rusqlite::{Connection, Result};

/// Initialise the escalations table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS escalations (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id          TEXT NOT NULL UNIQUE,
            channel_id          TEXT NOT NULL,
            user_id             TEXT NOT NULL,
            username            TEXT NOT NULL,
            channel_metadata    TEXT NOT NULL,
            question            TEXT NOT NULL,
            ai_draft_answer     TEXT NOT NULL,
            confidence_score    REAL,
            routing_action      TEXT NOT NULL,
            routing_reason      TEXT,
            sources             TEXT NOT NULL,
            status              TEXT NOT NULL,
            staff_id            TEXT,
            claimed_at          TEXT,
            responded_at        TEXT,
            staff_answer        TEXT,
            generated_faq_id    INTEGER,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_escalations_status ON escalations(status);
        CREATE INDEX IF NOT EXISTS idx_escalations_channel_id ON escalations(channel_id);",
    )
}

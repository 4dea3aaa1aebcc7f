use rusqlite::{Connection, Result};

/// Initialise the FAQ table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_faqs_table(conn)
}

fn create_faqs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS faqs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            question    TEXT NOT NULL,
            answer      TEXT NOT NULL,
            category    TEXT NOT NULL,
            source      TEXT NOT NULL,
            protocol    TEXT NOT NULL,
            verified    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_faqs_verified
            ON faqs(verified);
        CREATE INDEX IF NOT EXISTS idx_faqs_protocol
            ON faqs(protocol);",
    )
}

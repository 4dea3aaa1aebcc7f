use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{FaqError, Result};
use crate::types::{FaqCreate, FaqRecord, FaqUpdate};

/// Called whenever a mutation satisfies (I8): it touched a verified FAQ, or
/// it promoted an unverified FAQ to verified. Pure unverified-to-unverified
/// changes never call this — they are index-silent by design.
pub type RebuildTrigger = Arc<dyn Fn() + Send + Sync>;

/// SQLite-backed FAQ store. Thread-safe via a single connection `Mutex`,
/// following the teacher's memory-store shape (one connection, no pool).
pub struct FaqStore {
    db: Mutex<Connection>,
    on_rebuild_needed: Option<RebuildTrigger>,
}

impl FaqStore {
    pub fn new(conn: Connection, on_rebuild_needed: Option<RebuildTrigger>) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn), on_rebuild_needed })
    }

    fn notify_rebuild(&self) {
        if let Some(trigger) = &self.on_rebuild_needed {
            debug!("FAQ mutation touched verified state, signaling rebuild");
            trigger();
        }
    }

    pub fn create(&self, entry: FaqCreate) -> Result<FaqRecord> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO faqs (question, answer, category, source, protocol, verified, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                entry.question,
                entry.answer,
                entry.category,
                entry.source,
                entry.protocol,
                entry.verified,
                now,
            ],
        )?;
        let id = db.last_insert_rowid();
        drop(db);

        if entry.verified {
            self.notify_rebuild();
        }
        self.get(id)
    }

    pub fn get(&self, id: i64) -> Result<FaqRecord> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, question, answer, category, source, protocol, verified, created_at, updated_at
             FROM faqs WHERE id = ?1",
            rusqlite::params![id],
            row_to_faq,
        )
        .map_err(|_| FaqError::NotFound(id))
    }

    /// Apply a patch. Fires the rebuild trigger iff the FAQ was already
    /// verified before the update, or the update promotes it to verified
    /// (I8) — a purely-unverified edit is index-silent.
    pub fn update(&self, id: i64, patch: FaqUpdate) -> Result<FaqRecord> {
        let before = self.get(id)?;
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();

        let question = patch.question.unwrap_or(before.question.clone());
        let answer = patch.answer.unwrap_or(before.answer.clone());
        let category = patch.category.unwrap_or(before.category.clone());
        let protocol = patch.protocol.unwrap_or(before.protocol.clone());
        let verified = patch.verified.unwrap_or(before.verified);

        db.execute(
            "UPDATE faqs SET question = ?1, answer = ?2, category = ?3, protocol = ?4,
             verified = ?5, updated_at = ?6 WHERE id = ?7",
            rusqlite::params![question, answer, category, protocol, verified, now, id],
        )?;
        drop(db);

        let touches_verified_state = before.verified || verified;
        if touches_verified_state {
            self.notify_rebuild();
        }
        self.get(id)
    }

    /// Convenience wrapper over `update` for the common "promote to
    /// verified" case.
    pub fn verify(&self, id: i64) -> Result<FaqRecord> {
        self.update(id, FaqUpdate { verified: Some(true), ..Default::default() })
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let before = self.get(id)?;
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM faqs WHERE id = ?1", rusqlite::params![id])?;
        drop(db);
        if before.verified {
            self.notify_rebuild();
        }
        Ok(())
    }

    pub fn list_verified(&self) -> Result<Vec<FaqRecord>> {
        self.list_by_verified(true)
    }

    pub fn list_unverified(&self) -> Result<Vec<FaqRecord>> {
        self.list_by_verified(false)
    }

    fn list_by_verified(&self, verified: bool) -> Result<Vec<FaqRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, question, answer, category, source, protocol, verified, created_at, updated_at
             FROM faqs WHERE verified = ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![verified], row_to_faq)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_faq(row: &rusqlite::Row<'_>) -> rusqlite::Result<FaqRecord> {
    Ok(FaqRecord {
        id: row.get(0)?,
        question: row.get(1)?,
        answer: row.get(2)?,
        category: row.get(3)?,
        source: row.get(4)?,
        protocol: row.get(5)?,
        verified: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

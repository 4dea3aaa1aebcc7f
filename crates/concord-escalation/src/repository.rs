//! Escalation Engine (C10, §4.10): the review-queue state machine, its
//! delivery-on-respond side effect, and the learning/FAQ-generation loop.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concord_core::{DocumentReference, RoutingAction};
use concord_faq::{FaqCreate, FaqStore};
use rusqlite::{Connection, OptionalExtension};
use tracing::{error, warn};

use crate::error::{EscalationError, Result};
use crate::types::{
    AdminAction, EscalationCreate, EscalationFilter, EscalationRecord, EscalationStatus, GeneratedFaq,
    LearningSignal,
};

/// Delivers a staff reply back through the originating channel. The
/// delivery outcome is counted but never blocks the state transition
/// (§4.10 Delivery during respond).
#[async_trait]
pub trait DeliveryHandle: Send + Sync {
    async fn deliver_reply(
        &self,
        channel_id: &str,
        channel_metadata: &serde_json::Value,
        answer: &str,
        in_reply_to: &str,
    ) -> bool;
}

/// Sink for the learning signal recorded on every `respond` (§4.10.1).
/// Failures are logged, never block the transition.
#[async_trait]
pub trait LearningSink: Send + Sync {
    async fn record(&self, signal: LearningSignal) -> std::result::Result<(), String>;
}

pub struct EscalationRepository {
    db: Mutex<Connection>,
    claim_ttl_secs: i64,
    delivery: Arc<dyn DeliveryHandle>,
    learning: Arc<dyn LearningSink>,
    faq_store: Arc<FaqStore>,
}

impl EscalationRepository {
    pub fn new(
        conn: Connection,
        claim_ttl_secs: i64,
        delivery: Arc<dyn DeliveryHandle>,
        learning: Arc<dyn LearningSink>,
        faq_store: Arc<FaqStore>,
    ) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn), claim_ttl_secs, delivery, learning, faq_store })
    }

    pub fn create(&self, entry: EscalationCreate) -> Result<EscalationRecord> {
        let db = self.db.lock().unwrap();
        let existing: Option<i64> = db
            .query_row(
                "SELECT id FROM escalations WHERE message_id = ?1",
                rusqlite::params![entry.message_id],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(EscalationError::DuplicateEscalation(entry.message_id));
        }

        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO escalations (
                message_id, channel_id, user_id, username, channel_metadata, question,
                ai_draft_answer, confidence_score, routing_action, routing_reason, sources,
                status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                entry.message_id,
                entry.channel_id,
                entry.user_id,
                entry.username,
                entry.channel_metadata.to_string(),
                entry.question,
                entry.ai_draft_answer,
                entry.confidence_score,
                entry.routing_action.as_str(),
                entry.routing_reason,
                serde_json::to_string(&entry.sources)?,
                EscalationStatus::Pending.as_str(),
                now,
            ],
        )?;
        let id = db.last_insert_rowid();
        drop(db);
        self.get_by_id(id)
    }

    pub fn get_by_id(&self, id: i64) -> Result<EscalationRecord> {
        let db = self.db.lock().unwrap();
        db.query_row("SELECT * FROM escalations WHERE id = ?1", rusqlite::params![id], row_to_record)
            .map_err(|_| EscalationError::NotFound(id))
    }

    pub fn get_by_message_id(&self, message_id: &str) -> Result<EscalationRecord> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT * FROM escalations WHERE message_id = ?1",
            rusqlite::params![message_id],
            row_to_record,
        )
        .map_err(|_| EscalationError::NotFoundByMessageId(message_id.to_string()))
    }

    /// `pending|in_review -> in_review`. A re-claim by a different staff
    /// member while the existing claim is fresh is a conflict; a stale
    /// claim is simply replaced (§4.10 state machine).
    pub fn claim(&self, id: i64, staff_id: &str) -> Result<EscalationRecord> {
        let record = self.get_by_id(id)?;
        match record.status {
            EscalationStatus::Pending => {}
            EscalationStatus::InReview => {
                if record.staff_id.as_deref() != Some(staff_id) && !self.claim_is_stale(&record) {
                    return Err(EscalationError::ClaimConflict(id));
                }
            }
            other => {
                return Err(EscalationError::InvalidTransition(format!(
                    "cannot claim escalation {id} in state {}",
                    other.as_str()
                )))
            }
        }

        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE escalations SET status = ?1, staff_id = ?2, claimed_at = ?3 WHERE id = ?4",
            rusqlite::params![EscalationStatus::InReview.as_str(), staff_id, now, id],
        )?;
        drop(db);
        self.get_by_id(id)
    }

    fn claim_is_stale(&self, record: &EscalationRecord) -> bool {
        match &record.claimed_at {
            None => true,
            Some(ts) => match DateTime::parse_from_rfc3339(ts) {
                Ok(claimed_at) => (Utc::now() - claimed_at.with_timezone(&Utc)).num_seconds() > self.claim_ttl_secs,
                Err(_) => true,
            },
        }
    }

    /// `in_review -> responded`, only for the staff member holding the
    /// active claim. Delivers the answer and records the learning signal;
    /// both are best-effort and never block the transition.
    pub async fn respond(&self, id: i64, answer: &str, staff_id: &str) -> Result<EscalationRecord> {
        let record = self.get_by_id(id)?;
        if record.status != EscalationStatus::InReview || record.staff_id.as_deref() != Some(staff_id) {
            return Err(EscalationError::InvalidTransition(format!(
                "escalation {id} is not held by staff '{staff_id}' under an active claim"
            )));
        }

        let now = Utc::now().to_rfc3339();
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "UPDATE escalations SET status = ?1, staff_answer = ?2, responded_at = ?3 WHERE id = ?4",
                rusqlite::params![EscalationStatus::Responded.as_str(), answer, now, id],
            )?;
        }

        let delivered = self
            .delivery
            .deliver_reply(&record.channel_id, &record.channel_metadata, answer, &record.message_id)
            .await;
        if !delivered {
            warn!(escalation_id = id, "staff reply delivery failed, escalation remains marked responded");
        }

        let admin_action = if answer.trim() == record.ai_draft_answer.trim() {
            AdminAction::Approved
        } else {
            AdminAction::Edited
        };
        let signal = LearningSignal {
            question_id: format!("escalation:{id}"),
            confidence: record.confidence_score,
            admin_action,
            routing_action: record.routing_action.clone(),
            metadata: serde_json::json!({ "channel": record.channel_id, "staff_id": staff_id }),
        };
        if let Err(e) = self.learning.record(signal).await {
            error!(escalation_id = id, error = %e, "failed to record learning signal");
        }

        self.get_by_id(id)
    }

    pub fn close(&self, id: i64) -> Result<EscalationRecord> {
        self.get_by_id(id)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE escalations SET status = ?1 WHERE id = ?2",
            rusqlite::params![EscalationStatus::Closed.as_str(), id],
        )?;
        drop(db);
        self.get_by_id(id)
    }

    /// Reset `in_review` records whose claim has aged past `threshold_secs`
    /// back to `pending`. Returns the number reset.
    pub fn reset_stale(&self, threshold_secs: i64) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let cutoff = (Utc::now() - chrono::Duration::seconds(threshold_secs)).to_rfc3339();
        let changed = db.execute(
            "UPDATE escalations SET status = ?1, staff_id = NULL, claimed_at = NULL
             WHERE status = ?2 AND claimed_at IS NOT NULL AND claimed_at < ?3",
            rusqlite::params![EscalationStatus::Pending.as_str(), EscalationStatus::InReview.as_str(), cutoff],
        )?;
        Ok(changed)
    }

    /// Purge closed records older than `threshold_secs`. Returns the
    /// number purged.
    pub fn purge_old(&self, threshold_secs: i64) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let cutoff = (Utc::now() - chrono::Duration::seconds(threshold_secs)).to_rfc3339();
        let changed = db.execute(
            "DELETE FROM escalations WHERE status = ?1 AND created_at < ?2",
            rusqlite::params![EscalationStatus::Closed.as_str(), cutoff],
        )?;
        Ok(changed)
    }

    pub fn list(&self, filter: &EscalationFilter) -> Result<Vec<EscalationRecord>> {
        let db = self.db.lock().unwrap();
        let (clause, values) = filter.to_sql();
        let sql = format!("SELECT * FROM escalations{clause} ORDER BY created_at DESC");
        let mut stmt = db.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), row_to_record)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn counts(&self) -> Result<std::collections::HashMap<String, i64>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT status, COUNT(*) FROM escalations GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn generate_faq_from_escalation(
        &self,
        id: i64,
        question: &str,
        answer: &str,
        category: Option<String>,
        protocol: Option<String>,
    ) -> Result<GeneratedFaq> {
        let record = self.get_by_id(id)?;
        if !matches!(record.status, EscalationStatus::Responded | EscalationStatus::Closed) {
            return Err(EscalationError::EscalationNotResponded(id));
        }

        let faq = self.faq_store.create(FaqCreate {
            question: question.to_string(),
            answer: answer.to_string(),
            category: category.unwrap_or_else(|| "general".to_string()),
            source: "Escalation".to_string(),
            protocol: protocol.unwrap_or_else(|| "all".to_string()),
            verified: true,
        })?;

        let db = self.db.lock().unwrap();
        db.execute("UPDATE escalations SET generated_faq_id = ?1 WHERE id = ?2", rusqlite::params![faq.id, id])?;

        Ok(GeneratedFaq { faq_id: faq.id, question: faq.question, answer: faq.answer })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EscalationRecord> {
    let channel_metadata_raw: String = row.get("channel_metadata")?;
    let sources_raw: String = row.get("sources")?;
    let status_raw: String = row.get("status")?;
    let routing_action: String = row.get("routing_action")?;

    Ok(EscalationRecord {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        channel_id: row.get("channel_id")?,
        user_id: row.get("user_id")?,
        username: row.get("username")?,
        channel_metadata: serde_json::from_str(&channel_metadata_raw).unwrap_or(serde_json::Value::Null),
        question: row.get("question")?,
        ai_draft_answer: row.get("ai_draft_answer")?,
        confidence_score: row.get("confidence_score")?,
        routing_action: routing_action.clone(),
        routing_reason: row.get("routing_reason")?,
        sources: serde_json::from_str::<Vec<DocumentReference>>(&sources_raw).unwrap_or_default(),
        status: EscalationStatus::from_str_value(&status_raw).unwrap_or(EscalationStatus::Pending),
        staff_id: row.get("staff_id")?,
        claimed_at: row.get("claimed_at")?,
        responded_at: row.get("responded_at")?,
        staff_answer: row.get("staff_answer")?,
        generated_faq_id: row.get("generated_faq_id")?,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterField;
    use concord_faq::FaqStore as ConcordFaqStore;

    struct NullDelivery(bool);

    #[async_trait]
    impl DeliveryHandle for NullDelivery {
        async fn deliver_reply(&self, _c: &str, _m: &serde_json::Value, _a: &str, _r: &str) -> bool {
            self.0
        }
    }

    struct NullLearning;

    #[async_trait]
    impl LearningSink for NullLearning {
        async fn record(&self, _s: LearningSignal) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    fn repo() -> EscalationRepository {
        let conn = Connection::open_in_memory().unwrap();
        let faq_conn = rusqlite::Connection::open_in_memory().unwrap();
        let faq_store = Arc::new(ConcordFaqStore::new(faq_conn, None).unwrap());
        EscalationRepository::new(conn, 1800, Arc::new(NullDelivery(true)), Arc::new(NullLearning), faq_store)
            .unwrap()
    }

    fn sample() -> EscalationCreate {
        EscalationCreate {
            message_id: "msg-1".into(),
            channel_id: "web".into(),
            user_id: "user-1".into(),
            username: "alice".into(),
            channel_metadata: serde_json::json!({"delivery_target": "session-1"}),
            question: "how do I fund a trade?".into(),
            ai_draft_answer: "Send funds to escrow.".into(),
            confidence_score: Some(0.2),
            routing_action: RoutingAction::NeedsHuman,
            routing_reason: Some("low_confidence".into()),
            sources: vec![],
        }
    }

    #[test]
    fn create_rejects_duplicate_message_id() {
        let repo = repo();
        repo.create(sample()).unwrap();
        let err = repo.create(sample()).unwrap_err();
        assert!(matches!(err, EscalationError::DuplicateEscalation(_)));
    }

    #[test]
    fn claim_then_reclaim_by_different_staff_conflicts_while_fresh() {
        let repo = repo();
        let record = repo.create(sample()).unwrap();
        repo.claim(record.id, "staff-a").unwrap();
        let err = repo.claim(record.id, "staff-b").unwrap_err();
        assert!(matches!(err, EscalationError::ClaimConflict(_)));
    }

    #[test]
    fn reclaim_by_same_staff_is_allowed() {
        let repo = repo();
        let record = repo.create(sample()).unwrap();
        repo.claim(record.id, "staff-a").unwrap();
        let claimed = repo.claim(record.id, "staff-a").unwrap();
        assert_eq!(claimed.staff_id.as_deref(), Some("staff-a"));
    }

    #[tokio::test]
    async fn respond_requires_active_claim_holder() {
        let repo = repo();
        let record = repo.create(sample()).unwrap();
        repo.claim(record.id, "staff-a").unwrap();
        let err = repo.respond(record.id, "answer", "staff-b").await.unwrap_err();
        assert!(matches!(err, EscalationError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn respond_marks_approved_when_answer_matches_draft() {
        let repo = repo();
        let record = repo.create(sample()).unwrap();
        repo.claim(record.id, "staff-a").unwrap();
        let responded = repo.respond(record.id, "Send funds to escrow.", "staff-a").await.unwrap();
        assert_eq!(responded.status, EscalationStatus::Responded);
    }

    #[tokio::test]
    async fn generate_faq_requires_responded_status() {
        let repo = repo();
        let record = repo.create(sample()).unwrap();
        let err = repo
            .generate_faq_from_escalation(record.id, "q", "a", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EscalationError::EscalationNotResponded(_)));
    }

    #[tokio::test]
    async fn generate_faq_succeeds_once_responded() {
        let repo = repo();
        let record = repo.create(sample()).unwrap();
        repo.claim(record.id, "staff-a").unwrap();
        repo.respond(record.id, "edited answer", "staff-a").await.unwrap();

        let generated =
            repo.generate_faq_from_escalation(record.id, "q", "edited answer", None, None).await.unwrap();
        assert_eq!(generated.answer, "edited answer");

        let updated = repo.get_by_id(record.id).unwrap();
        assert_eq!(updated.generated_faq_id, Some(generated.faq_id));
    }

    #[test]
    fn list_filters_by_whitelisted_column_only() {
        let repo = repo();
        repo.create(sample()).unwrap();
        let found = repo.list(&EscalationFilter::new().with(FilterField::Status, "pending")).unwrap();
        assert_eq!(found.len(), 1);
        let empty = repo.list(&EscalationFilter::new().with(FilterField::Status, "closed")).unwrap();
        assert!(empty.is_empty());
    }
}

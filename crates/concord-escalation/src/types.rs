use concord_core::{DocumentReference, RoutingAction};
use serde::{Deserialize, Serialize};

/// Escalation lifecycle state (§3.3, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    InReview,
    Responded,
    Closed,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::InReview => "in_review",
            EscalationStatus::Responded => "responded",
            EscalationStatus::Closed => "closed",
        }
    }

    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EscalationStatus::Pending),
            "in_review" => Some(EscalationStatus::InReview),
            "responded" => Some(EscalationStatus::Responded),
            "closed" => Some(EscalationStatus::Closed),
            _ => None,
        }
    }
}

/// Fixed whitelist of columns `list()` is permitted to filter on (§4.10
/// repository contract — never interpolate a caller-supplied column name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    Status,
    ChannelId,
    UserId,
    StaffId,
}

impl FilterField {
    fn column(&self) -> &'static str {
        match self {
            FilterField::Status => "status",
            FilterField::ChannelId => "channel_id",
            FilterField::UserId => "user_id",
            FilterField::StaffId => "staff_id",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EscalationFilter {
    clauses: Vec<(FilterField, String)>,
}

impl EscalationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: FilterField, value: impl Into<String>) -> Self {
        self.clauses.push((field, value.into()));
        self
    }

    pub(crate) fn to_sql(&self) -> (String, Vec<String>) {
        if self.clauses.is_empty() {
            return (String::new(), Vec::new());
        }
        let predicates: Vec<String> =
            self.clauses.iter().enumerate().map(|(i, (f, _))| format!("{} = ?{}", f.column(), i + 1)).collect();
        let sql = format!(" WHERE {}", predicates.join(" AND "));
        let values = self.clauses.iter().map(|(_, v)| v.clone()).collect();
        (sql, values)
    }
}

/// Fields accepted when opening an escalation (§4.10 `create`).
#[derive(Debug, Clone)]
pub struct EscalationCreate {
    pub message_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub channel_metadata: serde_json::Value,
    pub question: String,
    pub ai_draft_answer: String,
    pub confidence_score: Option<f32>,
    pub routing_action: RoutingAction,
    pub routing_reason: Option<String>,
    pub sources: Vec<DocumentReference>,
}

/// Persistent escalation record (§3.1 Escalation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: i64,
    pub message_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub channel_metadata: serde_json::Value,
    pub question: String,
    pub ai_draft_answer: String,
    pub confidence_score: Option<f32>,
    pub routing_action: String,
    pub routing_reason: Option<String>,
    pub sources: Vec<DocumentReference>,
    pub status: EscalationStatus,
    pub staff_id: Option<String>,
    pub claimed_at: Option<String>,
    pub responded_at: Option<String>,
    pub staff_answer: Option<String>,
    pub generated_faq_id: Option<i64>,
    pub created_at: String,
}

/// Whether a staff reply matched the AI draft verbatim (after trimming) or
/// was edited (§4.10.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Approved,
    Edited,
}

/// Learning signal recorded on `respond` (§4.10.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSignal {
    pub question_id: String,
    pub confidence: Option<f32>,
    pub admin_action: AdminAction,
    pub routing_action: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GeneratedFaq {
    pub faq_id: i64,
    pub question: String,
    pub answer: String,
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("escalation {0} not found")]
    NotFound(i64),

    #[error("escalation for message '{0}' not found")]
    NotFoundByMessageId(String),

    #[error("escalation for message '{0}' already exists")]
    DuplicateEscalation(String),

    #[error("escalation {0} is claimed by another staff member")]
    ClaimConflict(i64),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("escalation {0} has not been responded to")]
    EscalationNotResponded(i64),

    #[error(transparent)]
    Faq(#[from] concord_faq::FaqError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EscalationError>;

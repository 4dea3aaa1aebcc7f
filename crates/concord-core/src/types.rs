use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Stable per-channel identifier, e.g. `"web"`, `"matrix"`, `"inapp"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used as the join key in context/reaction keys (§4.11).
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier for a user as known to the gateway (channel-agnostic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A user as it appears on an `IncomingMessage` (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub channel_user_id: String,
    pub session: Option<String>,
    pub auth_token: Option<String>,
}

/// One turn of prior conversation, either role-tagged or the legacy
/// user/assistant pair form (normalized by the RAG orchestrator, §4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::User => write!(f, "Human"),
            ChatRole::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Legacy {user, assistant} pair form accepted by the history normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyChatPair {
    pub user: Option<String>,
    pub assistant: Option<String>,
}

/// Either shape chat history may arrive in (§4.4 History normalization).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatHistoryEntry {
    Turn(ChatTurn),
    Pair(LegacyChatPair),
}

/// Message presented to the gateway (§3.1 IncomingMessage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: String,
    pub channel_id: ChannelId,
    pub question: String,
    #[serde(default)]
    pub chat_history: Vec<ChatHistoryEntry>,
    pub user: UserRef,
    #[serde(default)]
    pub channel_metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub bypass_hooks: HashSet<String>,
    #[serde(default)]
    pub channel_signature: Option<String>,
}

/// Relevance-scored source backing a generated answer (§3.1 DocumentReference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReference {
    pub document_id: String,
    pub title: String,
    pub url: Option<String>,
    pub section: Option<String>,
    pub category: String,
    pub protocol: String,
    pub relevance_score: f32,
}

/// Routing decision attached to a generated response (§4.9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAction {
    AutoSend,
    NeedsClarification,
    QueueMedium,
    NeedsHuman,
    /// Assigned by the dispatcher to the notice it sends in place of a
    /// queued draft, so reactions on the notice never feed learning.
    EscalationNotice,
    /// Catch-all for any value the RAG layer produced that isn't
    /// recognized. Carries the raw string so the dispatcher can log it.
    Unknown(String),
}

impl RoutingAction {
    pub fn as_str(&self) -> &str {
        match self {
            RoutingAction::AutoSend => "auto_send",
            RoutingAction::NeedsClarification => "needs_clarification",
            RoutingAction::QueueMedium => "queue_medium",
            RoutingAction::NeedsHuman => "needs_human",
            RoutingAction::EscalationNotice => "escalation_notice",
            RoutingAction::Unknown(s) => s.as_str(),
        }
    }

    pub fn from_str_value(s: &str) -> Self {
        match s {
            "auto_send" => RoutingAction::AutoSend,
            "needs_clarification" => RoutingAction::NeedsClarification,
            "queue_medium" => RoutingAction::QueueMedium,
            "needs_human" => RoutingAction::NeedsHuman,
            "escalation_notice" => RoutingAction::EscalationNotice,
            other => RoutingAction::Unknown(other.to_string()),
        }
    }

    pub fn is_direct_delivery(&self) -> bool {
        matches!(self, RoutingAction::AutoSend | RoutingAction::NeedsClarification)
    }

    pub fn is_review_queue(&self) -> bool {
        matches!(self, RoutingAction::QueueMedium | RoutingAction::NeedsHuman)
    }
}

/// Everything the gateway records about how a response was produced (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub processing_time_ms: u64,
    pub rag_strategy: String,
    pub model_name: String,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub confidence_score: Option<f32>,
    pub routing_action: RoutingAction,
    #[serde(default)]
    pub routing_reason: Option<String>,
    #[serde(default)]
    pub version_info: Option<String>,
    #[serde(default)]
    pub hooks_executed: Vec<String>,
}

/// Response produced by RAG or constructed by the dispatcher (§3.1 OutgoingMessage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub in_reply_to: String,
    pub channel_id: ChannelId,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<DocumentReference>,
    pub user: UserRef,
    pub metadata: ResponseMetadata,
    #[serde(default)]
    pub suggested_questions: Option<Vec<String>>,
    #[serde(default)]
    pub requires_human: bool,
    pub original_question: String,
}

/// Error taxonomy surfaced by the gateway (§4.8, §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RateLimitExceeded,
    AuthenticationFailed,
    AuthorizationFailed,
    InvalidMessage,
    ValidationError,
    PiiDetected,
    ChannelUnavailable,
    RagServiceError,
    InternalError,
}

impl ErrorCode {
    /// HTTP status an exposing layer should map this to (§6). The gateway
    /// itself never speaks HTTP — this is a pure lookup table for whatever
    /// transport wraps it.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::RateLimitExceeded => 429,
            ErrorCode::AuthenticationFailed => 401,
            ErrorCode::AuthorizationFailed => 403,
            ErrorCode::InvalidMessage | ErrorCode::ValidationError | ErrorCode::PiiDetected => 400,
            ErrorCode::ChannelUnavailable => 503,
            ErrorCode::RagServiceError | ErrorCode::InternalError => 500,
        }
    }
}

/// Error returned by gateway processing (§4.8). User-facing: never carries
/// a stack trace or internal identifier (§7).
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct GatewayError {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub recoverable: bool,
}

impl GatewayError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self { error_code, message: message.into(), recoverable: false }
    }

    pub fn recoverable(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self { error_code, message: message.into(), recoverable: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_action_round_trips_known_values() {
        for raw in ["auto_send", "needs_clarification", "queue_medium", "needs_human", "escalation_notice"] {
            let action = RoutingAction::from_str_value(raw);
            assert_eq!(action.as_str(), raw);
        }
    }

    #[test]
    fn unknown_routing_action_is_preserved() {
        let action = RoutingAction::from_str_value("some_future_value");
        assert!(matches!(action, RoutingAction::Unknown(_)));
        assert_eq!(action.as_str(), "some_future_value");
    }

    #[test]
    fn direct_vs_review_queue_classification() {
        assert!(RoutingAction::AutoSend.is_direct_delivery());
        assert!(RoutingAction::NeedsClarification.is_direct_delivery());
        assert!(RoutingAction::QueueMedium.is_review_queue());
        assert!(RoutingAction::NeedsHuman.is_review_queue());
        assert!(!RoutingAction::AutoSend.is_review_queue());
    }

    #[test]
    fn error_code_http_mapping_matches_spec_table() {
        assert_eq!(ErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(ErrorCode::AuthenticationFailed.http_status(), 401);
        assert_eq!(ErrorCode::AuthorizationFailed.http_status(), 403);
        assert_eq!(ErrorCode::InvalidMessage.http_status(), 400);
        assert_eq!(ErrorCode::ValidationError.http_status(), 400);
        assert_eq!(ErrorCode::PiiDetected.http_status(), 400);
        assert_eq!(ErrorCode::ChannelUnavailable.http_status(), 503);
        assert_eq!(ErrorCode::RagServiceError.http_status(), 500);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
    }

    #[test]
    fn channel_id_normalizes_for_key_building() {
        let ch = ChannelId::from("Matrix");
        assert_eq!(ch.normalized(), "matrix");
    }
}

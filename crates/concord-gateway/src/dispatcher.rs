//! Response Dispatcher (C9, §4.9): routes one gateway-produced
//! `OutgoingMessage` to direct delivery or the escalation review queue.

use std::sync::Arc;

use concord_channels::ChannelRegistry;
use concord_core::{ChannelId, IncomingMessage, OutgoingMessage, RoutingAction};
use concord_escalation::{EscalationCreate, EscalationRepository};
use tracing::{debug, error, warn};

const GENERIC_ESCALATION_TEMPLATE: &str =
    "Your question has been forwarded to our support team. A staff member will review and respond shortly. (Reference: #{escalation_id})";

/// Registry-mediated middle tier of the escalation-notice fallback chain:
/// formatters keyed by channel for adapters that don't carry their own
/// `format_escalation_message` on the plugin instance (§2 supplement).
pub trait EscalationFormatterRegistry: Send + Sync {
    fn format(&self, channel_id: &ChannelId, username: &str, escalation_id: &str, support_handle: &str) -> Option<String>;
}

pub struct NoFormatters;
impl EscalationFormatterRegistry for NoFormatters {
    fn format(&self, _channel_id: &ChannelId, _username: &str, _escalation_id: &str, _support_handle: &str) -> Option<String> {
        None
    }
}

pub struct ResponseDispatcher {
    registry: Arc<ChannelRegistry>,
    escalations: Arc<EscalationRepository>,
    formatters: Arc<dyn EscalationFormatterRegistry>,
    support_handle: String,
}

impl ResponseDispatcher {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        escalations: Arc<EscalationRepository>,
        formatters: Arc<dyn EscalationFormatterRegistry>,
        support_handle: impl Into<String>,
    ) -> Self {
        Self { registry, escalations, formatters, support_handle: support_handle.into() }
    }

    /// Dispatch one gateway result. Returns `true` only when a real answer
    /// (not just a queued-review notice) was delivered.
    pub async fn dispatch(&self, incoming: &IncomingMessage, outgoing: OutgoingMessage) -> bool {
        let action = outgoing.metadata.routing_action.clone();
        let review_queue = outgoing.requires_human || action.is_review_queue();

        if !review_queue {
            if !action.is_direct_delivery() {
                warn!(routing_action = action.as_str(), "unknown routing action, failing open to auto_send");
            }
            return self.deliver_direct(incoming, &outgoing).await;
        }

        self.deliver_via_review_queue(incoming, outgoing).await
    }

    async fn deliver_direct(&self, incoming: &IncomingMessage, outgoing: &OutgoingMessage) -> bool {
        let target = self.resolve_target(incoming).await;
        if target.is_empty() {
            warn!(channel = %incoming.channel_id, "no delivery target resolved, dropping message");
            return false;
        }
        self.send(incoming, &target, outgoing).await
    }

    async fn deliver_via_review_queue(&self, incoming: &IncomingMessage, outgoing: OutgoingMessage) -> bool {
        let create = EscalationCreate {
            message_id: incoming.message_id.clone(),
            channel_id: incoming.channel_id.to_string(),
            user_id: incoming.user.id.to_string(),
            username: incoming.user.channel_user_id.clone(),
            channel_metadata: serde_json::to_value(&incoming.channel_metadata).unwrap_or(serde_json::Value::Null),
            question: outgoing.original_question.clone(),
            ai_draft_answer: outgoing.answer.clone(),
            confidence_score: outgoing.metadata.confidence_score,
            routing_action: outgoing.metadata.routing_action.clone(),
            routing_reason: outgoing.metadata.routing_reason.clone(),
            sources: outgoing.sources.clone(),
        };

        let record = match self.escalations.create(create) {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "failed to create escalation, dropping notice");
                return false;
            }
        };

        let notice_text = self.format_escalation_notice(incoming, &record.id.to_string()).await;

        let mut notice = outgoing;
        notice.answer = notice_text;
        notice.requires_human = true;
        notice.sources = Vec::new();
        notice.metadata.confidence_score = None;
        notice.metadata.routing_action = RoutingAction::EscalationNotice;

        let target = self.resolve_target(incoming).await;
        if target.is_empty() {
            warn!(channel = %incoming.channel_id, "no delivery target for escalation notice");
            return false;
        }
        if !self.send(incoming, &target, &notice).await {
            debug!(channel = %incoming.channel_id, "escalation notice delivery failed, ignoring beyond logging");
        }
        false
    }

    async fn resolve_target(&self, incoming: &IncomingMessage) -> String {
        self.registry
            .get_delivery_target(&incoming.channel_id, &incoming.channel_metadata)
            .await
            .unwrap_or_default()
    }

    async fn send(&self, incoming: &IncomingMessage, target: &str, message: &OutgoingMessage) -> bool {
        match self.registry.send_message(&incoming.channel_id, target, message).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(channel = %incoming.channel_id, error = %e, "delivery failed");
                false
            }
        }
    }

    /// Three-tier fallback: the plugin's own formatter, then a
    /// registry-mediated adapter formatter, then the generic template.
    /// Exceptions from either formatter stage are swallowed at debug and
    /// fall through to the next option (§2 supplement).
    async fn format_escalation_notice(&self, incoming: &IncomingMessage, escalation_id: &str) -> String {
        let username = &incoming.user.channel_user_id;

        if let Some(text) =
            self.registry.format_escalation_message(&incoming.channel_id, username, escalation_id, &self.support_handle).await
        {
            return text;
        }

        if let Some(text) =
            self.formatters.format(&incoming.channel_id, username, escalation_id, &self.support_handle)
        {
            return text;
        }

        GENERIC_ESCALATION_TEMPLATE.replace("{escalation_id}", escalation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use concord_channels::{ChannelError, ChannelPlugin, HealthStatus};
    use concord_core::{ChatHistoryEntry, ResponseMetadata, UserId, UserRef};
    use concord_escalation::{DeliveryHandle, EscalationRepository, LearningSink};
    use concord_faq::FaqStore;
    use rusqlite::Connection;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingPlugin {
        id: ChannelId,
        sent: Arc<Mutex<Vec<(String, String)>>>,
        send_ok: bool,
    }

    #[async_trait]
    impl ChannelPlugin for RecordingPlugin {
        fn channel_id(&self) -> &ChannelId {
            &self.id
        }
        async fn start(&mut self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn stop(&mut self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn send_message(&self, target: &str, message: &OutgoingMessage) -> std::result::Result<bool, ChannelError> {
            self.sent.lock().unwrap().push((target.to_string(), message.answer.clone()));
            Ok(self.send_ok)
        }
        async fn handle_incoming(&self, _raw: serde_json::Value) -> std::result::Result<OutgoingMessage, ChannelError> {
            unimplemented!()
        }
        fn get_delivery_target(&self, metadata: &HashMap<String, serde_json::Value>) -> String {
            metadata.get("room").and_then(|v| v.as_str()).unwrap_or_default().to_string()
        }
        fn health_check(&self) -> HealthStatus {
            HealthStatus::Healthy
        }
    }

    struct NullDelivery;
    #[async_trait]
    impl DeliveryHandle for NullDelivery {
        async fn deliver_reply(&self, _c: &str, _m: &serde_json::Value, _a: &str, _r: &str) -> bool {
            true
        }
    }

    struct NullLearning;
    #[async_trait]
    impl LearningSink for NullLearning {
        async fn record(&self, _s: concord_escalation::LearningSignal) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    fn incoming(channel: &str, room: &str) -> IncomingMessage {
        let mut channel_metadata = HashMap::new();
        channel_metadata.insert("room".to_string(), serde_json::json!(room));
        IncomingMessage {
            message_id: "m1".into(),
            channel_id: ChannelId::from(channel),
            question: "how do I fund a trade?".into(),
            chat_history: Vec::<ChatHistoryEntry>::new(),
            user: UserRef { id: UserId::from("u1"), channel_user_id: "alice".into(), session: None, auth_token: None },
            channel_metadata,
            bypass_hooks: HashSet::new(),
            channel_signature: None,
        }
    }

    fn outgoing(routing_action: RoutingAction, requires_human: bool) -> OutgoingMessage {
        OutgoingMessage {
            message_id: "o1".into(),
            in_reply_to: "m1".into(),
            channel_id: ChannelId::from("web"),
            answer: "Send funds to escrow.".into(),
            sources: Vec::new(),
            user: UserRef { id: UserId::from("u1"), channel_user_id: "alice".into(), session: None, auth_token: None },
            metadata: ResponseMetadata {
                processing_time_ms: 10,
                rag_strategy: "hybrid".into(),
                model_name: "test-model".into(),
                tokens_used: None,
                confidence_score: Some(0.9),
                routing_action,
                routing_reason: None,
                version_info: None,
                hooks_executed: Vec::new(),
            },
            suggested_questions: None,
            requires_human,
            original_question: "how do I fund a trade?".into(),
        }
    }

    fn escalation_repo() -> Arc<EscalationRepository> {
        let conn = Connection::open_in_memory().unwrap();
        let faq_store = Arc::new(FaqStore::new(conn, None).unwrap());
        let conn2 = Connection::open_in_memory().unwrap();
        Arc::new(EscalationRepository::new(conn2, 1800, Arc::new(NullDelivery), Arc::new(NullLearning), faq_store).unwrap())
    }

    #[tokio::test]
    async fn auto_send_delivers_directly() {
        let registry = Arc::new(ChannelRegistry::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(Box::new(RecordingPlugin { id: ChannelId::from("web"), sent: sent.clone(), send_ok: true }), 0)
            .unwrap();
        let dispatcher =
            ResponseDispatcher::new(registry, escalation_repo(), Arc::new(NoFormatters), "support@example.com");

        let delivered = dispatcher.dispatch(&incoming("web", "room-1"), outgoing(RoutingAction::AutoSend, false)).await;
        assert!(delivered);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requires_human_forces_review_queue_even_for_auto_send() {
        let registry = Arc::new(ChannelRegistry::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(Box::new(RecordingPlugin { id: ChannelId::from("web"), sent: sent.clone(), send_ok: true }), 0)
            .unwrap();
        let dispatcher =
            ResponseDispatcher::new(registry, escalation_repo(), Arc::new(NoFormatters), "support@example.com");

        let delivered = dispatcher.dispatch(&incoming("web", "room-1"), outgoing(RoutingAction::AutoSend, true)).await;
        assert!(!delivered);
        let recorded = sent.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].1.contains("forwarded to our support team"));
    }

    #[tokio::test]
    async fn needs_human_creates_escalation_and_sends_generic_notice() {
        let registry = Arc::new(ChannelRegistry::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(Box::new(RecordingPlugin { id: ChannelId::from("web"), sent: sent.clone(), send_ok: true }), 0)
            .unwrap();
        let dispatcher =
            ResponseDispatcher::new(registry, escalation_repo(), Arc::new(NoFormatters), "support@example.com");

        let delivered = dispatcher.dispatch(&incoming("web", "room-1"), outgoing(RoutingAction::NeedsHuman, false)).await;
        assert!(!delivered);
        let recorded = sent.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].1.starts_with("Your question has been forwarded"));
    }

    #[tokio::test]
    async fn empty_delivery_target_drops_direct_message() {
        let registry = Arc::new(ChannelRegistry::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(Box::new(RecordingPlugin { id: ChannelId::from("web"), sent: sent.clone(), send_ok: true }), 0)
            .unwrap();
        let dispatcher =
            ResponseDispatcher::new(registry, escalation_repo(), Arc::new(NoFormatters), "support@example.com");

        let delivered = dispatcher.dispatch(&incoming("web", ""), outgoing(RoutingAction::AutoSend, false)).await;
        assert!(!delivered);
        assert!(sent.lock().unwrap().is_empty());
    }

    struct CountingFormatters {
        calls: AtomicUsize,
    }
    impl EscalationFormatterRegistry for CountingFormatters {
        fn format(&self, _c: &ChannelId, username: &str, escalation_id: &str, _s: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(format!("Hang tight {username}, ticket #{escalation_id} is in queue."))
        }
    }

    #[tokio::test]
    async fn registry_formatter_used_when_plugin_has_none() {
        let registry = Arc::new(ChannelRegistry::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(Box::new(RecordingPlugin { id: ChannelId::from("web"), sent: sent.clone(), send_ok: true }), 0)
            .unwrap();
        let formatters = Arc::new(CountingFormatters { calls: AtomicUsize::new(0) });
        let dispatcher = ResponseDispatcher::new(registry, escalation_repo(), formatters.clone(), "support@example.com");

        dispatcher.dispatch(&incoming("web", "room-1"), outgoing(RoutingAction::NeedsHuman, false)).await;
        assert_eq!(formatters.calls.load(Ordering::SeqCst), 1);
        assert!(sent.lock().unwrap()[0].1.contains("Hang tight alice"));
    }
}

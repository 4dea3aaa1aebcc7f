//! Feedback Follow-up Coordinator (C11, §4.11): tracks an in-flight
//! "why didn't that help?" prompt per (channel, delivery target, reactor)
//! thread, under a single lock shared by both its lookup indices.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::types::{context_key, reaction_key, FollowupRecord, PendingFollowup};

/// Sends the per-channel prompt/ack messages (§6 templates). Injected so
/// this crate never depends on a specific channel transport.
#[async_trait]
pub trait PromptSender: Send + Sync {
    async fn send_system_message(
        &self,
        channel_id: &str,
        delivery_target: &str,
        routing_action: &str,
        content: &str,
        in_reply_to: Option<&str>,
    ) -> bool;
}

/// Best-effort issue-tag extraction from a clarification message. Failures
/// are swallowed by the coordinator and default to no tags.
#[async_trait]
pub trait FeedbackAnalyzer: Send + Sync {
    async fn analyze_feedback_text(&self, text: &str) -> std::result::Result<Vec<String>, String>;
}

/// Persists the clarification against the original feedback entry.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn update_feedback_entry(
        &self,
        internal_message_id: &str,
        explanation: &str,
        issues: &[String],
    ) -> std::result::Result<(), String>;
}

struct CoordinatorState {
    by_context: HashMap<String, PendingFollowup>,
    by_reaction: HashMap<String, String>,
}

/// Default prompt shown when a negative reaction is received (§6).
pub const FOLLOWUP_PROMPT: &str =
    "Thanks for the feedback. What was incorrect or missing in the previous AI answer? A short reply helps us improve.";
/// Default acknowledgement shown once a clarification is recorded (§6).
pub const FOLLOWUP_ACK: &str = "Thanks. I have recorded your clarification for quality improvement.";

pub struct FollowupCoordinator {
    state: Mutex<CoordinatorState>,
    ttl: Duration,
    sender: std::sync::Arc<dyn PromptSender>,
    analyzer: std::sync::Arc<dyn FeedbackAnalyzer>,
    feedback_sink: std::sync::Arc<dyn FeedbackSink>,
}

impl FollowupCoordinator {
    pub fn new(
        ttl: Duration,
        sender: std::sync::Arc<dyn PromptSender>,
        analyzer: std::sync::Arc<dyn FeedbackAnalyzer>,
        feedback_sink: std::sync::Arc<dyn FeedbackSink>,
    ) -> Self {
        Self {
            state: Mutex::new(CoordinatorState { by_context: HashMap::new(), by_reaction: HashMap::new() }),
            ttl,
            sender,
            analyzer,
            feedback_sink,
        }
    }

    /// Start (or refresh) a follow-up. Returns `false` if the inputs are
    /// invalid, or the prompt send failed (in which case bookkeeping is
    /// rolled back).
    pub async fn start_followup(
        &self,
        record: FollowupRecord,
        channel_id: &str,
        external_message_id: &str,
        reactor_id: &str,
        reactor_identity_hash: &str,
    ) -> bool {
        if reactor_id.is_empty() {
            return false;
        }
        let Some(delivery_target) = record.delivery_target.clone() else {
            return false;
        };

        let ctx_key = context_key(channel_id, &delivery_target, reactor_id);
        let react_key = reaction_key(channel_id, external_message_id, reactor_identity_hash);

        {
            let mut state = self.state.lock().await;

            let already_pending = match state.by_context.get(&ctx_key) {
                Some(existing) => !existing.is_expired() && existing.external_message_id == external_message_id,
                None => false,
            };

            if already_pending {
                if let Some(existing) = state.by_context.get_mut(&ctx_key) {
                    existing.expires_at = Instant::now() + self.ttl;
                }
                return true;
            }

            state.by_context.insert(
                ctx_key.clone(),
                PendingFollowup {
                    reaction_key: react_key.clone(),
                    external_message_id: external_message_id.to_string(),
                    record,
                    expires_at: Instant::now() + self.ttl,
                },
            );
            state.by_reaction.insert(react_key.clone(), ctx_key.clone());
        }

        let sent = self
            .sender
            .send_system_message(channel_id, &delivery_target, "feedback_followup_prompt", FOLLOWUP_PROMPT, None)
            .await;
        if sent {
            return true;
        }

        warn!(channel_id, "failed to deliver follow-up prompt, rolling back");
        let mut state = self.state.lock().await;
        state.by_context.remove(&ctx_key);
        state.by_reaction.remove(&react_key);
        false
    }

    /// Remove a pending follow-up by its reaction key. Idempotent.
    pub async fn cancel_followup(&self, channel_id: &str, external_message_id: &str, reactor_identity_hash: &str) {
        let react_key = reaction_key(channel_id, external_message_id, reactor_identity_hash);
        let mut state = self.state.lock().await;
        if let Some(ctx_key) = state.by_reaction.remove(&react_key) {
            state.by_context.remove(&ctx_key);
        }
    }

    /// Consume a pending follow-up as the clarification for the context.
    /// Returns `false` with the entry left in place if persistence failed,
    /// or if there was no (non-expired) pending follow-up.
    pub async fn consume_if_pending(
        &self,
        channel_id: &str,
        delivery_target: &str,
        reactor_id: &str,
        clarification_text: &str,
    ) -> bool {
        let ctx_key = context_key(channel_id, delivery_target, reactor_id);

        let pending = {
            let mut state = self.state.lock().await;
            match state.by_context.get(&ctx_key) {
                Some(p) if p.is_expired() => {
                    let expired = state.by_context.remove(&ctx_key).unwrap();
                    state.by_reaction.remove(&expired.reaction_key);
                    None
                }
                Some(p) => Some(p.clone()),
                None => None,
            }
        };
        let Some(pending) = pending else {
            return false;
        };

        let issues = match self.analyzer.analyze_feedback_text(clarification_text).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(error = %e, "feedback analysis failed, defaulting to no issue tags");
                Vec::new()
            }
        };

        if let Err(e) =
            self.feedback_sink.update_feedback_entry(&pending.record.internal_message_id, clarification_text, &issues).await
        {
            warn!(error = %e, "failed to persist clarification, leaving follow-up pending");
            return false;
        }

        {
            let mut state = self.state.lock().await;
            state.by_context.remove(&ctx_key);
            state.by_reaction.remove(&pending.reaction_key);
        }

        self.sender
            .send_system_message(
                channel_id,
                delivery_target,
                "feedback_followup_ack",
                FOLLOWUP_ACK,
                Some(&pending.record.internal_message_id),
            )
            .await;
        true
    }
}

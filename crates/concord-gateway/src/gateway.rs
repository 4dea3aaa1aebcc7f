//! Channel Gateway (C8, §4.8): the single entry point every inbound
//! message passes through on its way to a routed, hook-wrapped response.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use concord_core::{ChannelId, ErrorCode, GatewayError, IncomingMessage, OutgoingMessage, ResponseMetadata};
use concord_channels::ChannelRegistry;
use concord_hooks::HookPipeline;
use concord_rag::RagOrchestrator;
use concord_retrieval::SearchFilter;
use futures_util::FutureExt;
use tracing::warn;

use crate::error::Result;

pub struct ChannelGateway {
    registry: Arc<ChannelRegistry>,
    hooks: Arc<HookPipeline>,
    rag: Arc<RagOrchestrator>,
}

impl ChannelGateway {
    pub fn new(registry: Arc<ChannelRegistry>, hooks: Arc<HookPipeline>, rag: Arc<RagOrchestrator>) -> Self {
        Self { registry, hooks, rag }
    }

    /// Run the full pipeline: validate, pre-hooks, RAG, wrap, post-hooks
    /// (§4.8 steps 1-6).
    pub async fn process_message(&self, mut message: IncomingMessage) -> Result<OutgoingMessage> {
        let started_at = Instant::now();

        if message.question.trim().is_empty() {
            return Err(GatewayError::new(ErrorCode::InvalidMessage, "question must not be empty"));
        }
        if !self.registry.contains(&message.channel_id) {
            return Err(GatewayError::new(
                ErrorCode::InvalidMessage,
                format!("unknown channel '{}'", message.channel_id),
            ));
        }

        let hooks_executed = self.hooks.run_pre(&mut message).await.map_err(hook_error_into_gateway)?;

        let filter = SearchFilter::default();
        let rag_result = AssertUnwindSafe(self.rag.generate(
            &message.question,
            &message.chat_history,
            &filter,
            &[],
        ))
        .catch_unwind()
        .await
        .map_err(|_| {
            GatewayError::recoverable(ErrorCode::RagServiceError, "RAG orchestrator panicked")
        })?;

        let processing_time_ms = started_at.elapsed().as_millis() as u64;
        let requires_human = rag_result.routing_action.is_review_queue();

        let mut outgoing = OutgoingMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            in_reply_to: message.message_id.clone(),
            channel_id: message.channel_id.clone(),
            answer: rag_result.answer,
            sources: rag_result.sources,
            user: message.user.clone(),
            metadata: ResponseMetadata {
                processing_time_ms,
                rag_strategy: rag_result.rag_strategy,
                model_name: rag_result.model_name,
                tokens_used: rag_result.tokens_used,
                confidence_score: rag_result.confidence_score,
                routing_action: rag_result.routing_action,
                routing_reason: rag_result.routing_reason,
                version_info: None,
                hooks_executed,
            },
            suggested_questions: None,
            requires_human,
            original_question: message.question.clone(),
        };

        let post_hooks_executed =
            self.hooks.run_post(&message, &mut outgoing).await.map_err(hook_error_into_gateway)?;
        outgoing.metadata.hooks_executed.extend(post_hooks_executed);

        Ok(outgoing)
    }
}

fn hook_error_into_gateway(err: concord_hooks::HookError) -> GatewayError {
    match err {
        concord_hooks::HookError::Aborted(gateway_err) => gateway_err,
        concord_hooks::HookError::DuplicateName(name) => {
            warn!(hook = %name, "duplicate hook name surfaced at dispatch time");
            GatewayError::new(ErrorCode::InternalError, "hook pipeline misconfigured")
        }
    }
}

//! RAG Orchestrator (C4, §4.4): retrieve, format a prompt, invoke the LLM,
//! and turn the outcome into a routing decision.

use std::sync::Arc;

use async_trait::async_trait;
use concord_core::{ChatHistoryEntry, DocumentReference, RoutingAction};
use tracing::{error, warn};

use concord_retrieval::{Retriever, SearchFilter};

use crate::prompt::{build_context_only_prompt, build_prompt, normalize_history};

const APOLOGY: &str =
    "I'm sorry, I wasn't able to put together an answer just now. A member of staff can help if you try again in a moment.";
const NO_INFORMATION: &str =
    "I don't have information on that yet. Could you rephrase, or ask about a specific step in the process?";

const HIGH_CONFIDENCE: f32 = 0.6;
const LOW_CONFIDENCE: f32 = 0.3;

/// Completes a prompt with a language model. Implemented outside this
/// crate — which provider, which model, is an injected concern.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, String>;

    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Fetches the full body text behind a `DocumentReference`. Citations and
/// chunk content live in different stores, so this is injected rather than
/// carried on the reference itself.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn fetch_content(&self, document_id: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct RagResult {
    pub answer: String,
    pub sources: Vec<DocumentReference>,
    pub confidence_score: Option<f32>,
    pub routing_action: RoutingAction,
    pub routing_reason: Option<String>,
    pub rag_strategy: String,
    pub model_name: String,
    pub tokens_used: Option<u64>,
}

pub struct RagOrchestrator {
    retriever: Arc<dyn Retriever>,
    content_store: Arc<dyn ContentStore>,
    llm: Arc<dyn LanguageModel>,
    history_turns: usize,
    max_context_chars: usize,
    top_k: usize,
}

impl RagOrchestrator {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        content_store: Arc<dyn ContentStore>,
        llm: Arc<dyn LanguageModel>,
        history_turns: usize,
        max_context_chars: usize,
        top_k: usize,
    ) -> Self {
        Self { retriever, content_store, llm, history_turns, max_context_chars, top_k }
    }

    pub async fn generate(
        &self,
        question: &str,
        chat_history: &[ChatHistoryEntry],
        filter: &SearchFilter,
        feedback_guidance: &[String],
    ) -> RagResult {
        let history = normalize_history(chat_history, self.history_turns);

        let sources = match self.retriever.retrieve_with_scores(question, self.top_k, filter).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "retrieval failed, proceeding without sources");
                Vec::new()
            }
        };

        if sources.is_empty() && history.is_empty() {
            return RagResult {
                answer: NO_INFORMATION.to_string(),
                sources: Vec::new(),
                confidence_score: None,
                routing_action: RoutingAction::NeedsHuman,
                routing_reason: Some("no_sources_no_history".to_string()),
                rag_strategy: "hybrid".to_string(),
                model_name: self.llm.model_name().to_string(),
                tokens_used: None,
            };
        }

        let (prompt, strategy) = if sources.is_empty() {
            (build_context_only_prompt(question, &history), "context_only")
        } else {
            let mut passages = Vec::with_capacity(sources.len());
            for doc in &sources {
                if let Some(content) = self.content_store.fetch_content(&doc.document_id).await {
                    passages.push(content);
                }
            }
            (build_prompt(question, &history, &passages, self.max_context_chars, feedback_guidance), "hybrid")
        };

        let answer = match self.llm.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "language model call failed");
                return RagResult {
                    answer: APOLOGY.to_string(),
                    sources: Vec::new(),
                    confidence_score: None,
                    routing_action: RoutingAction::NeedsHuman,
                    routing_reason: Some("llm_failure".to_string()),
                    rag_strategy: strategy.to_string(),
                    model_name: self.llm.model_name().to_string(),
                    tokens_used: None,
                };
            }
        };

        let confidence = if strategy == "context_only" {
            Some(0.5)
        } else {
            sources.iter().map(|d| d.relevance_score).fold(None, |acc, s| {
                Some(acc.map_or(s, |a: f32| a.max(s)))
            })
        };

        let (routing_action, routing_reason) = classify(confidence, strategy);

        RagResult {
            answer,
            sources,
            confidence_score: confidence,
            routing_action,
            routing_reason,
            rag_strategy: strategy.to_string(),
            model_name: self.llm.model_name().to_string(),
            tokens_used: None,
        }
    }
}

fn classify(confidence: Option<f32>, strategy: &str) -> (RoutingAction, Option<String>) {
    if strategy == "context_only" {
        return (RoutingAction::QueueMedium, Some("context_only_answer".to_string()));
    }
    match confidence {
        Some(c) if c >= HIGH_CONFIDENCE => (RoutingAction::AutoSend, None),
        Some(c) if c >= LOW_CONFIDENCE => {
            (RoutingAction::NeedsClarification, Some("moderate_confidence".to_string()))
        }
        _ => (RoutingAction::NeedsHuman, Some("low_confidence".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_retrieval::RetrievalError;

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LanguageModel for FixedLlm {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LanguageModel for FailingLlm {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, String> {
            Err("provider timeout".to_string())
        }
    }

    struct NullContentStore;

    #[async_trait]
    impl ContentStore for NullContentStore {
        async fn fetch_content(&self, _id: &str) -> Option<String> {
            Some("Send the agreed amount to the escrow address.".to_string())
        }
    }

    struct FixedRetriever(Vec<DocumentReference>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(&self, _q: &str, _k: usize, _f: &SearchFilter) -> concord_retrieval::Result<Vec<DocumentReference>> {
            Ok(self.0.clone())
        }
        async fn retrieve_with_scores(
            &self,
            _q: &str,
            _k: usize,
            _f: &SearchFilter,
        ) -> concord_retrieval::Result<Vec<DocumentReference>> {
            Ok(self.0.clone())
        }
    }

    struct FailingRetriever;

    #[async_trait]
    impl Retriever for FailingRetriever {
        async fn retrieve(&self, _q: &str, _k: usize, _f: &SearchFilter) -> concord_retrieval::Result<Vec<DocumentReference>> {
            Err(RetrievalError::StoreUnreachable("down".into()))
        }
        async fn retrieve_with_scores(
            &self,
            _q: &str,
            _k: usize,
            _f: &SearchFilter,
        ) -> concord_retrieval::Result<Vec<DocumentReference>> {
            Err(RetrievalError::StoreUnreachable("down".into()))
        }
    }

    fn doc(score: f32) -> DocumentReference {
        DocumentReference {
            document_id: "1".into(),
            title: "Funding a trade".into(),
            url: None,
            section: None,
            category: "trading".into(),
            protocol: "bisq".into(),
            relevance_score: score,
        }
    }

    #[tokio::test]
    async fn high_confidence_source_routes_to_auto_send() {
        let orchestrator = RagOrchestrator::new(
            Arc::new(FixedRetriever(vec![doc(0.9)])),
            Arc::new(NullContentStore),
            Arc::new(FixedLlm("Send funds to escrow.")),
            5,
            8000,
            5,
        );
        let result = orchestrator.generate("how do I fund?", &[], &SearchFilter::default(), &[]).await;
        assert_eq!(result.routing_action, RoutingAction::AutoSend);
        assert_eq!(result.confidence_score, Some(0.9));
    }

    #[tokio::test]
    async fn low_confidence_source_routes_to_needs_human() {
        let orchestrator = RagOrchestrator::new(
            Arc::new(FixedRetriever(vec![doc(0.1)])),
            Arc::new(NullContentStore),
            Arc::new(FixedLlm("maybe this")),
            5,
            8000,
            5,
        );
        let result = orchestrator.generate("how do I fund?", &[], &SearchFilter::default(), &[]).await;
        assert_eq!(result.routing_action, RoutingAction::NeedsHuman);
    }

    #[tokio::test]
    async fn llm_failure_yields_stable_apology_and_needs_human() {
        let orchestrator = RagOrchestrator::new(
            Arc::new(FixedRetriever(vec![doc(0.9)])),
            Arc::new(NullContentStore),
            Arc::new(FailingLlm),
            5,
            8000,
            5,
        );
        let result = orchestrator.generate("how do I fund?", &[], &SearchFilter::default(), &[]).await;
        assert_eq!(result.answer, APOLOGY);
        assert_eq!(result.routing_action, RoutingAction::NeedsHuman);
    }

    #[tokio::test]
    async fn no_sources_no_history_returns_stock_reply() {
        let orchestrator = RagOrchestrator::new(
            Arc::new(FixedRetriever(vec![])),
            Arc::new(NullContentStore),
            Arc::new(FixedLlm("unused")),
            5,
            8000,
            5,
        );
        let result = orchestrator.generate("what is this?", &[], &SearchFilter::default(), &[]).await;
        assert_eq!(result.answer, NO_INFORMATION);
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_to_empty_sources_not_panic() {
        let orchestrator = RagOrchestrator::new(
            Arc::new(FailingRetriever),
            Arc::new(NullContentStore),
            Arc::new(FixedLlm("unused")),
            5,
            8000,
            5,
        );
        let result = orchestrator.generate("anything?", &[], &SearchFilter::default(), &[]).await;
        assert!(result.sources.is_empty());
    }
}

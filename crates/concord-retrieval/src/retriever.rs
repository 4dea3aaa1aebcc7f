//! Hybrid dense+sparse retrieval (C3) and the resilience wrapper around it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use concord_core::DocumentReference;
use tracing::{error, warn};

use crate::bm25::SparseTokenizer;
use crate::error::Result;
use crate::fusion::weighted_combine;

/// Payload filter applied by the backing store to both the dense and
/// sparse searches.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub protocol: Option<String>,
    pub doc_type: Option<String>,
}

/// Turns query text into a dense embedding. Implemented outside this crate
/// (embedding model is an injected dependency, not something this crate
/// owns).
#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Name recorded in index metadata so a model swap is detected as a
    /// source change (§4.2).
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// A vector store capable of independent dense and sparse nearest-neighbour
/// search. Each hit already carries its document metadata, matching how a
/// payload-indexed vector collection returns results.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search_dense(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(DocumentReference, f32)>>;

    async fn search_sparse(
        &self,
        sparse: &crate::bm25::SparseVector,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(DocumentReference, f32)>>;
}

/// Common retrieval surface so `ResilientRetriever` can wrap any backend
/// (a hybrid retriever, a dense-only fallback, or an alternate store).
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize, filter: &SearchFilter) -> Result<Vec<DocumentReference>>;

    async fn retrieve_with_scores(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<DocumentReference>>;
}

/// Combines dense and sparse search with weighted min-max fusion (§4.3).
pub struct HybridRetriever {
    tokenizer: Arc<SparseTokenizer>,
    embedder: Arc<dyn DenseEmbedder>,
    store: Arc<dyn VectorSearch>,
    dense_weight: f32,
    sparse_weight: f32,
}

impl HybridRetriever {
    pub fn new(
        tokenizer: Arc<SparseTokenizer>,
        embedder: Arc<dyn DenseEmbedder>,
        store: Arc<dyn VectorSearch>,
        dense_weight: f32,
        sparse_weight: f32,
    ) -> Self {
        Self { tokenizer, embedder, store, dense_weight, sparse_weight }
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, query: &str, k: usize, filter: &SearchFilter) -> Result<Vec<DocumentReference>> {
        self.retrieve_with_scores(query, k, filter).await
    }

    async fn retrieve_with_scores(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<DocumentReference>> {
        let dense_vec = self.embedder.embed(query).await?;
        let sparse_vec = self.tokenizer.tokenize_query(query)?;

        let dense_hits = self.store.search_dense(&dense_vec, k, filter).await?;
        let sparse_hits = self.store.search_sparse(&sparse_vec, k, filter).await?;

        let mut by_id: std::collections::HashMap<String, DocumentReference> = std::collections::HashMap::new();
        for (doc, _) in dense_hits.iter().chain(sparse_hits.iter()) {
            by_id.entry(doc.document_id.clone()).or_insert_with(|| doc.clone());
        }

        let dense_pairs: Vec<(String, f32)> =
            dense_hits.iter().map(|(d, s)| (d.document_id.clone(), *s)).collect();
        let sparse_pairs: Vec<(String, f32)> =
            sparse_hits.iter().map(|(d, s)| (d.document_id.clone(), *s)).collect();

        let fused = weighted_combine(&dense_pairs, &sparse_pairs, self.dense_weight, self.sparse_weight);

        let results = fused
            .into_iter()
            .take(k)
            .filter_map(|(id, score)| {
                by_id.get(&id).cloned().map(|mut doc| {
                    doc.relevance_score = score;
                    doc
                })
            })
            .collect();
        Ok(results)
    }
}

struct FallbackState {
    using_fallback: bool,
    last_failure: Option<Instant>,
}

/// Wraps a primary and fallback retriever. On primary failure it switches
/// to the fallback, counts failures, and retries the primary every
/// `reset_interval` (default 300s). Never raises — on both-failed it
/// returns an empty result (§4.3 Resilience).
pub struct ResilientRetriever {
    primary: Arc<dyn Retriever>,
    fallback: Arc<dyn Retriever>,
    reset_interval: Duration,
    failure_count: AtomicU64,
    state: Mutex<FallbackState>,
}

impl ResilientRetriever {
    pub fn new(primary: Arc<dyn Retriever>, fallback: Arc<dyn Retriever>, reset_interval: Duration) -> Self {
        Self {
            primary,
            fallback,
            reset_interval,
            failure_count: AtomicU64::new(0),
            state: Mutex::new(FallbackState { using_fallback: false, last_failure: None }),
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }

    fn should_retry_primary(&self) -> bool {
        let state = self.state.lock().unwrap();
        if !state.using_fallback {
            return true;
        }
        match state.last_failure {
            Some(t) => t.elapsed() >= self.reset_interval,
            None => true,
        }
    }

    fn record_primary_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.using_fallback = true;
        state.last_failure = Some(Instant::now());
    }

    fn record_primary_recovery(&self) {
        let mut state = self.state.lock().unwrap();
        state.using_fallback = false;
        state.last_failure = None;
    }

    async fn run(&self, query: &str, k: usize, filter: &SearchFilter, with_scores: bool) -> Vec<DocumentReference> {
        if self.should_retry_primary() {
            let primary_result = if with_scores {
                self.primary.retrieve_with_scores(query, k, filter).await
            } else {
                self.primary.retrieve(query, k, filter).await
            };
            match primary_result {
                Ok(docs) => {
                    self.record_primary_recovery();
                    return docs;
                }
                Err(e) => {
                    warn!(error = %e, "primary retriever failed, switching to fallback");
                    self.record_primary_failure();
                }
            }
        }

        let fallback_result = if with_scores {
            self.fallback.retrieve_with_scores(query, k, filter).await
        } else {
            self.fallback.retrieve(query, k, filter).await
        };
        match fallback_result {
            Ok(docs) => docs,
            Err(e) => {
                error!(error = %e, "fallback retriever also failed, returning empty result");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Retriever for ResilientRetriever {
    async fn retrieve(&self, query: &str, k: usize, filter: &SearchFilter) -> Result<Vec<DocumentReference>> {
        Ok(self.run(query, k, filter, false).await)
    }

    async fn retrieve_with_scores(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<DocumentReference>> {
        Ok(self.run(query, k, filter, true).await)
    }
}

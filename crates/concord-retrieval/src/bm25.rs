//! Sparse (BM25) tokenizer: turns document/query text into term-weighted
//! sparse vectors, and owns the vocabulary those weights are computed
//! against. Term-frequency saturation, term ids, and embedding are
//! delegated to the `bm25` crate; this module keeps only the
//! document-frequency bookkeeping needed for query-side IDF and the
//! vocabulary size cap.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use bm25::{Embedder, EmbedderBuilder, Tokenizer as Bm25Tokenizer};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RetrievalError, Result};

/// A document or query reduced to (vocabulary id, weight) pairs, suitable
/// for upsert into a sparse vector family or for a dot-product query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl From<bm25::Embedding<u32>> for SparseVector {
    fn from(embedding: bm25::Embedding<u32>) -> Self {
        Self {
            indices: embedding.indices().copied().collect(),
            values: embedding.values().copied().collect(),
        }
    }
}

/// Point-in-time view of the tokenizer's corpus statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStatistics {
    pub num_documents: u64,
    pub vocabulary_size: usize,
    pub avg_document_length: f32,
    pub at_vocabulary_limit: bool,
}

/// Serializable snapshot of the vocabulary, for atomic persistence next to
/// a rebuilt collection (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularySnapshot {
    pub terms: Vec<String>,
    pub doc_freq: Vec<u32>,
    pub doc_count: u64,
    pub total_doc_length: u64,
}

/// Word-boundary tokenizer shared between the `bm25` crate's embedder and
/// this module's own document-frequency bookkeeping, so both sides agree
/// on what counts as a term.
#[derive(Debug, Clone, Default)]
struct ConcordTokenizer;

impl Bm25Tokenizer for ConcordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect()
    }
}

struct VocabState {
    doc_freq: HashMap<String, u32>,
    doc_count: u64,
    total_doc_length: u64,
    at_limit: bool,
    warned_at_limit: bool,
}

impl VocabState {
    fn new() -> Self {
        Self {
            doc_freq: HashMap::new(),
            doc_count: 0,
            total_doc_length: 0,
            at_limit: false,
            warned_at_limit: false,
        }
    }

    fn avg_document_length(&self) -> f32 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.total_doc_length as f32 / self.doc_count as f32
        }
    }
}

/// BM25 sparse tokenizer (k1=1.5, b=0.75 by default, §4.1). A single lock
/// serializes every mutation, `load_vocabulary` included, so a rebuild can
/// never race with concurrent ingest.
pub struct SparseTokenizer {
    state: Mutex<VocabState>,
    k1: f32,
    b: f32,
    max_input_bytes: usize,
    max_vocabulary_size: usize,
}

impl SparseTokenizer {
    pub fn new(k1: f32, b: f32, max_input_bytes: usize, max_vocabulary_size: usize) -> Self {
        Self {
            state: Mutex::new(VocabState::new()),
            k1,
            b,
            max_input_bytes,
            max_vocabulary_size,
        }
    }

    fn check_size(&self, text: &str) -> Result<()> {
        if text.len() > self.max_input_bytes {
            return Err(RetrievalError::InputTooLarge {
                size: text.len(),
                limit: self.max_input_bytes,
            });
        }
        Ok(())
    }

    fn embedder(&self, avgdl: f32) -> Embedder<u32, ConcordTokenizer> {
        EmbedderBuilder::<u32, ConcordTokenizer>::with_avgdl(avgdl.max(1.0))
            .k1(self.k1)
            .b(self.b)
            .build()
    }

    /// The crate-derived vocabulary id for a single term, used to keep this
    /// module's own document-frequency map addressed by the same ids the
    /// embedder assigns.
    fn term_id(&self, term: &str) -> u32 {
        *self.embedder(1.0).embed(term).indices().next().unwrap()
    }

    /// Tokenize a document, updating vocabulary/statistics, and return its
    /// sparse vector. TF-saturation against the corpus's current average
    /// length is computed by the `bm25` crate's embedder; the corpus-wide
    /// IDF factor is applied on the query side by `tokenize_query`.
    pub fn tokenize_document(&self, text: &str) -> Result<SparseVector> {
        self.check_size(text)?;
        let words = ConcordTokenizer.tokenize(text);
        let doc_len = words.len() as u64;

        let mut state = self.state.lock().unwrap();
        state.doc_count += 1;
        state.total_doc_length += doc_len;
        let avgdl = state.avg_document_length().max(1.0);

        let mut admitted: Vec<String> = Vec::with_capacity(words.len());
        let mut touched: HashSet<String> = HashSet::new();
        for word in &words {
            if state.doc_freq.contains_key(word) {
                admitted.push(word.clone());
                touched.insert(word.clone());
            } else if state.doc_freq.len() < self.max_vocabulary_size {
                state.doc_freq.insert(word.clone(), 0);
                admitted.push(word.clone());
                touched.insert(word.clone());
            } else {
                state.at_limit = true;
                if !state.warned_at_limit {
                    warn!(
                        max_vocabulary_size = self.max_vocabulary_size,
                        "sparse vocabulary at capacity, dropping further terms"
                    );
                    state.warned_at_limit = true;
                }
            }
        }
        for term in &touched {
            *state.doc_freq.get_mut(term).unwrap() += 1;
        }
        drop(state);

        if admitted.is_empty() {
            return Ok(SparseVector::default());
        }
        let embedder = self.embedder(avgdl);
        Ok(embedder.embed(&admitted.join(" ")).into())
    }

    /// Tokenize a query against the frozen vocabulary. Terms not already in
    /// the vocabulary are dropped — a query never grows the index.
    pub fn tokenize_query(&self, text: &str) -> Result<SparseVector> {
        self.check_size(text)?;
        let words = ConcordTokenizer.tokenize(text);

        let state = self.state.lock().unwrap();
        let n = state.doc_count as f32;
        let mut seen = HashSet::new();
        let mut pairs: Vec<(u32, f32)> = Vec::new();
        for word in &words {
            if !seen.insert(word.clone()) {
                continue;
            }
            if let Some(&df) = state.doc_freq.get(word) {
                let df = df as f32;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln().max(0.0);
                pairs.push((self.term_id(word), idf));
            }
        }
        drop(state);
        pairs.sort_by_key(|(id, _)| *id);

        Ok(SparseVector {
            indices: pairs.iter().map(|(id, _)| *id).collect(),
            values: pairs.iter().map(|(_, w)| *w).collect(),
        })
    }

    pub fn get_statistics(&self) -> IndexStatistics {
        let state = self.state.lock().unwrap();
        IndexStatistics {
            num_documents: state.doc_count,
            vocabulary_size: state.doc_freq.len(),
            avg_document_length: state.avg_document_length(),
            at_vocabulary_limit: state.at_limit,
        }
    }

    pub fn export_vocabulary(&self) -> VocabularySnapshot {
        let state = self.state.lock().unwrap();
        let mut terms: Vec<String> = state.doc_freq.keys().cloned().collect();
        terms.sort();
        let doc_freq = terms.iter().map(|t| state.doc_freq[t]).collect();
        VocabularySnapshot {
            terms,
            doc_freq,
            doc_count: state.doc_count,
            total_doc_length: state.total_doc_length,
        }
    }

    /// Replace the vocabulary wholesale. Takes the same lock as every other
    /// mutation, so this can never interleave with an in-flight
    /// `tokenize_document` call.
    pub fn load_vocabulary(&self, snapshot: VocabularySnapshot) -> Result<()> {
        if snapshot.terms.len() != snapshot.doc_freq.len() {
            return Err(RetrievalError::InvalidVocabulary(format!(
                "{} terms but {} doc_freq entries",
                snapshot.terms.len(),
                snapshot.doc_freq.len()
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.doc_freq = snapshot.terms.into_iter().zip(snapshot.doc_freq).collect();
        state.doc_count = snapshot.doc_count;
        state.total_doc_length = snapshot.total_doc_length;
        state.at_limit = state.doc_freq.len() >= self.max_vocabulary_size;
        state.warned_at_limit = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> SparseTokenizer {
        SparseTokenizer::new(1.5, 0.75, 100 * 1024, 500_000)
    }

    #[test]
    fn tokenize_document_grows_vocabulary_and_stats() {
        let t = tokenizer();
        t.tokenize_document("escrow release trade").unwrap();
        let stats = t.get_statistics();
        assert_eq!(stats.num_documents, 1);
        assert_eq!(stats.vocabulary_size, 3);
        assert!(!stats.at_vocabulary_limit);
    }

    #[test]
    fn query_drops_unknown_terms() {
        let t = tokenizer();
        t.tokenize_document("escrow release trade").unwrap();
        let v = t.tokenize_query("escrow refund unknownword").unwrap();
        assert_eq!(v.indices.len(), 1);
    }

    #[test]
    fn query_never_mutates_vocabulary() {
        let t = tokenizer();
        t.tokenize_document("escrow release").unwrap();
        t.tokenize_query("a brand new phrase entirely").unwrap();
        assert_eq!(t.get_statistics().vocabulary_size, 2);
    }

    #[test]
    fn oversized_input_is_rejected() {
        let t = SparseTokenizer::new(1.5, 0.75, 8, 500_000);
        let err = t.tokenize_document("this text is far longer than 8 bytes").unwrap_err();
        assert!(matches!(err, RetrievalError::InputTooLarge { .. }));
    }

    #[test]
    fn vocabulary_cap_drops_silently_and_flags_at_limit() {
        let t = SparseTokenizer::new(1.5, 0.75, 100 * 1024, 2);
        t.tokenize_document("alpha beta gamma delta").unwrap();
        let stats = t.get_statistics();
        assert_eq!(stats.vocabulary_size, 2);
        assert!(stats.at_vocabulary_limit);
    }

    #[test]
    fn export_then_load_round_trips_statistics() {
        let t = tokenizer();
        t.tokenize_document("escrow release trade dispute").unwrap();
        let snapshot = t.export_vocabulary();

        let t2 = tokenizer();
        t2.load_vocabulary(snapshot).unwrap();
        assert_eq!(t2.get_statistics().vocabulary_size, 4);
        assert_eq!(t2.get_statistics().num_documents, 1);
    }

    #[test]
    fn load_vocabulary_rejects_mismatched_lengths() {
        let t = tokenizer();
        let bad = VocabularySnapshot {
            terms: vec!["escrow".to_string()],
            doc_freq: vec![],
            doc_count: 1,
            total_doc_length: 1,
        };
        assert!(t.load_vocabulary(bad).is_err());
    }
}

pub mod bm25;
pub mod error;
pub mod fusion;
pub mod index_manager;
pub mod retriever;

pub use bm25::{IndexStatistics, SparseTokenizer, SparseVector, VocabularySnapshot};
pub use error::{RetrievalError, Result};
pub use index_manager::{
    stable_point_id, CollectionStore, CorpusDocument, CorpusSource, FileCorpusSource, IndexManager,
    IndexManagerConfig, IndexPoint,
};
pub use retriever::{DenseEmbedder, HybridRetriever, ResilientRetriever, Retriever, SearchFilter, VectorSearch};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("input is {size} bytes, exceeds the {limit} byte limit")]
    InputTooLarge { size: usize, limit: usize },

    #[error("vocabulary snapshot is malformed: {0}")]
    InvalidVocabulary(String),

    #[error("a rebuild is already in progress for this collection")]
    RebuildInProgress,

    #[error("backing store unreachable after retrying: {0}")]
    StoreUnreachable(String),

    #[error(transparent)]
    Faq(#[from] concord_faq::FaqError),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

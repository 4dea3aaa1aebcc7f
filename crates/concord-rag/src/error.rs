use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] concord_retrieval::RetrievalError),

    #[error("language model call failed: {0}")]
    LanguageModel(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

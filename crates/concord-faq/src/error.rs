use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaqError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("FAQ {0} not found")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, FaqError>;

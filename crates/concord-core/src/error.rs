use thiserror::Error;

/// Errors shared across crates that don't belong to a single subsystem's
/// own error type — chiefly configuration loading and shared serialization.
#[derive(Debug, Error)]
pub enum ConcordError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ConcordError>;

use thiserror::Error;

/// Errors from the content library. Kept separate from `CopydeskError` so the
/// workflow and scheduler layers can decide which ones are recoverable.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Content item not found: {0}")]
    ContentNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

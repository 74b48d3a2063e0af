use thiserror::Error;

/// Process-level error. Subsystem crates keep their own error enums and the
/// daemon folds them into this one at the boundary.
#[derive(Debug, Error)]
pub enum CopydeskError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CopydeskError {
    /// Short error code string handed to callers of the exposed surface.
    pub fn code(&self) -> &'static str {
        match self {
            CopydeskError::Config(_) => "CONFIG_ERROR",
            CopydeskError::State(_) => "STATE_ERROR",
            CopydeskError::NotFound { .. } => "NOT_FOUND",
            CopydeskError::Database(_) => "DATABASE_ERROR",
            CopydeskError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            CopydeskError::Publish(_) => "PUBLISH_ERROR",
            CopydeskError::Serialization(_) => "SERIALIZATION_ERROR",
            CopydeskError::Io(_) => "IO_ERROR",
            CopydeskError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Configuration and state errors are never worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CopydeskError::ServiceUnavailable(_) | CopydeskError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CopydeskError>;

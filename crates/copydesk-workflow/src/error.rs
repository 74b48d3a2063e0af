use thiserror::Error;

use crate::types::{Stage, WorkflowMode};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow session not found: {0}")]
    SessionNotFound(String),

    /// The current stage's output does not allow moving on yet.
    #[error("stage {stage} is not complete: {reason}")]
    StageIncomplete { stage: Stage, reason: String },

    #[error("workflow session {0} is already completed")]
    SessionCompleted(String),

    #[error("session {session_id} runs in {mode} mode")]
    WrongMode { session_id: String, mode: WorkflowMode },

    /// A stage snapshot is written once and never replaced.
    #[error("snapshot for stage {0} already recorded")]
    SnapshotExists(Stage),

    #[error("no active publishing account")]
    NoActiveAccount,

    #[error("publish failed: {0}")]
    Publish(String),

    #[error(transparent)]
    Provider(#[from] copydesk_providers::ProviderError),

    #[error(transparent)]
    Library(#[from] copydesk_library::LibraryError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Rejections caused by the session's state rather than a failure.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::StageIncomplete { .. }
                | WorkflowError::SessionCompleted(_)
                | WorkflowError::WrongMode { .. }
                | WorkflowError::SnapshotExists(_)
        )
    }
}

impl From<WorkflowError> for copydesk_core::CopydeskError {
    fn from(e: WorkflowError) -> Self {
        use copydesk_core::CopydeskError;
        match e {
            WorkflowError::SessionNotFound(id) => CopydeskError::NotFound {
                kind: "workflow session",
                id,
            },
            WorkflowError::NoActiveAccount => CopydeskError::Config(e.to_string()),
            WorkflowError::Provider(ref p) if p.is_service_unavailable() => {
                CopydeskError::ServiceUnavailable(e.to_string())
            }
            WorkflowError::Provider(copydesk_providers::ProviderError::NotConfigured(msg)) => {
                CopydeskError::Config(msg)
            }
            WorkflowError::Publish(msg) => CopydeskError::Publish(msg),
            WorkflowError::Database(_) | WorkflowError::Library(_) => {
                CopydeskError::Database(e.to_string())
            }
            WorkflowError::Serialization(inner) => CopydeskError::Serialization(inner),
            e if e.is_state_error() => CopydeskError::State(e.to_string()),
            e => CopydeskError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use copydesk_core::CopydeskError;

    #[test]
    fn state_rejections_map_to_state_code() {
        let err: CopydeskError = WorkflowError::SessionCompleted("s1".into()).into();
        assert_eq!(err.code(), "STATE_ERROR");
        let err: CopydeskError = WorkflowError::SessionNotFound("s1".into()).into();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn provider_outage_is_service_unavailable() {
        let err: CopydeskError =
            WorkflowError::Provider(copydesk_providers::ProviderError::Unavailable("down".into())).into();
        assert!(err.is_retryable());
        let err: CopydeskError =
            WorkflowError::Provider(copydesk_providers::ProviderError::NotConfigured("key".into())).into();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}

use copydesk_library::AccountStatus;
use copydesk_workflow::Stage;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The schedule cannot produce a fire time (bad cron, bad interval).
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A task definition failed validation.
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Scheduled task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Task {task_id} publishes but names no account")]
    MissingAccount { task_id: String },

    #[error("Account {account_id} cannot publish (status {status})")]
    AccountUnavailable {
        account_id: String,
        status: AccountStatus,
    },

    /// The automatic pipeline stopped at a mandatory stage.
    #[error("Content run failed at {stage}: {error}")]
    RunFailed { stage: Stage, error: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Workflow(#[from] copydesk_workflow::WorkflowError),

    #[error(transparent)]
    Library(#[from] copydesk_library::LibraryError),
}

impl SchedulerError {
    /// Errors caused by the task's own configuration rather than by a
    /// collaborator being down.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidSchedule(_)
                | SchedulerError::InvalidTask(_)
                | SchedulerError::MissingAccount { .. }
                | SchedulerError::AccountUnavailable { .. }
                | SchedulerError::Config(_)
        )
    }
}

impl From<SchedulerError> for copydesk_core::CopydeskError {
    fn from(e: SchedulerError) -> Self {
        use copydesk_core::CopydeskError;
        match e {
            SchedulerError::TaskNotFound { id } => CopydeskError::NotFound {
                kind: "scheduled task",
                id,
            },
            SchedulerError::Workflow(inner) => inner.into(),
            SchedulerError::Database(_) | SchedulerError::Library(_) => {
                CopydeskError::Database(e.to_string())
            }
            SchedulerError::Serialization(inner) => CopydeskError::Serialization(inner),
            e if e.is_config_error() => CopydeskError::Config(e.to_string()),
            e => CopydeskError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use copydesk_core::CopydeskError;

    #[test]
    fn codes_follow_the_error_kind() {
        let err: CopydeskError = SchedulerError::TaskNotFound { id: "t".into() }.into();
        assert_eq!(err.code(), "NOT_FOUND");
        let err: CopydeskError = SchedulerError::MissingAccount { task_id: "t".into() }.into();
        assert_eq!(err.code(), "CONFIG_ERROR");
        let err: CopydeskError =
            SchedulerError::Workflow(copydesk_workflow::WorkflowError::WrongMode {
                session_id: "s".into(),
                mode: copydesk_workflow::WorkflowMode::Auto,
            })
            .into();
        assert_eq!(err.code(), "STATE_ERROR");
    }
}

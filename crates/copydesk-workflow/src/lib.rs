pub mod conversation;
pub mod db;
pub mod error;
pub mod orchestrator;
pub mod publishing;
pub mod session;
pub mod settings;
pub mod stage;
pub mod stages;
pub mod types;

pub use conversation::ConversationLog;
pub use error::{Result, WorkflowError};
pub use orchestrator::WorkflowOrchestrator;
pub use publishing::{publish_claimed, publish_item};
pub use session::SessionStore;
pub use settings::{PipelineSettings, SettingsStore};
pub use stage::{StageContext, StageHandler, StageReply, StageTable, Validation};
pub use types::*;

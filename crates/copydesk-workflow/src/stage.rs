use std::sync::Arc;

use async_trait::async_trait;
use copydesk_library::ContentItem;
use copydesk_providers::{ContentGenerator, ImageGenerator};

use crate::error::Result;
use crate::stages::{EditStage, GenerateStage, ImageStage, OptimizeStage};
use crate::types::{ContentPreview, ConversationMessage, Stage, StageSnapshot, WorkflowSession};

/// Everything a handler may read, plus the draft it may change.
///
/// Handlers only mutate `content`; the orchestrator persists it afterwards.
pub struct StageContext<'a> {
    pub session: &'a WorkflowSession,
    pub content: &'a mut ContentItem,
    /// This stage's conversation so far, oldest first. Empty on entry.
    pub history: &'a [ConversationMessage],
    pub prompt_override: Option<&'a str>,
}

/// A handler's answer to one message or one automatic step.
#[derive(Debug, Clone, Default)]
pub struct StageReply {
    pub reply: String,
    pub can_proceed: bool,
    pub preview: Option<ContentPreview>,
    pub suggestions: Vec<String>,
    /// Stored with the assistant message.
    pub metadata: serde_json::Value,
}

impl StageReply {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            can_proceed: true,
            preview: None,
            suggestions: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_preview(mut self, content: &ContentItem) -> Self {
        self.preview = Some(ContentPreview::of(content));
        self
    }

    pub fn with_suggestions(mut self, suggestions: &[&str]) -> Self {
        self.suggestions = suggestions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn blocked(mut self) -> Self {
        self.can_proceed = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// One step of the content pipeline.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    /// Handle an operator message. An empty message with an empty history is
    /// the stage's opening turn.
    async fn process(&self, ctx: StageContext<'_>, message: &str) -> Result<StageReply>;

    /// Run the stage without an operator.
    async fn auto_execute(&self, ctx: StageContext<'_>) -> Result<StageReply>;

    fn snapshot(&self, session: &WorkflowSession, content: &ContentItem) -> StageSnapshot;

    fn can_proceed(&self, content: &ContentItem) -> bool {
        self.validate(content).valid
    }

    fn validate(&self, _content: &ContentItem) -> Validation {
        Validation::ok()
    }
}

/// Handlers indexed by `Stage::handler_index`.
#[derive(Clone)]
pub struct StageTable {
    handlers: [Arc<dyn StageHandler>; 4],
}

impl StageTable {
    /// The standard pipeline over the given collaborators.
    pub fn new(generator: Arc<dyn ContentGenerator>, images: Arc<dyn ImageGenerator>) -> Self {
        Self {
            handlers: [
                Arc::new(GenerateStage::new(generator.clone())),
                Arc::new(OptimizeStage::new(generator.clone())),
                Arc::new(ImageStage::new(generator.clone(), images)),
                Arc::new(EditStage::new(generator)),
            ],
        }
    }

    /// Custom handlers, one per working stage in pipeline order.
    pub fn from_handlers(handlers: [Arc<dyn StageHandler>; 4]) -> Self {
        debug_assert!(handlers
            .iter()
            .zip(Stage::WORKING)
            .all(|(h, s)| h.stage() == s));
        Self { handlers }
    }

    pub fn get(&self, stage: Stage) -> Option<&Arc<dyn StageHandler>> {
        stage.handler_index().map(|i| &self.handlers[i])
    }
}

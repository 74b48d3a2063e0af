use copydesk_core::{ContentKind, Role};
use serde::{Deserialize, Serialize};

/// A single turn of prior conversation handed to the model as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// The draft being revised, plus the stage conversation so far.
#[derive(Debug, Clone, Default)]
pub struct Revision {
    pub current_title: String,
    pub current_body: String,
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub content_kind: ContentKind,
    /// What to write about. `None` lets the model pick a trending subject.
    pub topic_hint: Option<String>,
    /// Free-form instructions from the operator.
    pub instructions: Option<String>,
    /// Set when revising an existing draft instead of writing from scratch.
    pub revision: Option<Revision>,
    /// Replaces the configured system prompt for this call only.
    pub prompt_override: Option<String>,
}

impl GenerateRequest {
    pub fn fresh(content_kind: ContentKind, topic_hint: Option<String>) -> Self {
        Self {
            content_kind,
            topic_hint,
            instructions: None,
            revision: None,
            prompt_override: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedContent {
    pub title: String,
    pub body: String,
    pub image_prompts: Vec<String>,
    pub token_usage: u64,
}

#[derive(Debug, Clone)]
pub struct OptimizeRequest {
    pub content_kind: ContentKind,
    pub title: String,
    pub body: String,
    pub instructions: Option<String>,
    pub prompt_override: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizedContent {
    pub title: String,
    pub body: String,
    pub token_usage: u64,
}

/// What a short rewrite applies to. Selects the built-in system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteTarget {
    Paragraph,
    ImagePrompt,
}

#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub target: RewriteTarget,
    pub text: String,
    pub instructions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedImage {
    /// Position of the prompt in the request.
    pub index: usize,
    pub url: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFailure {
    pub index: usize,
    pub error: String,
}

/// Outcome of rendering several prompts. Individual failures do not fail the
/// batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBatch {
    pub success_count: usize,
    pub images: Vec<RenderedImage>,
    pub errors: Vec<ImageFailure>,
}

/// Content handed to the publisher. `title` is `None` for microblog posts.
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    pub content_id: String,
    pub content_kind: ContentKind,
    pub title: Option<String>,
    pub body: String,
    pub image_paths: Vec<String>,
    pub tags: Vec<String>,
}

/// Session material the publisher authenticates with.
#[derive(Debug, Clone, Serialize)]
pub struct AccountCredentials {
    pub account_id: String,
    pub platform_uid: String,
    pub cookies: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub success: bool,
    pub url: Option<String>,
    pub message: String,
}

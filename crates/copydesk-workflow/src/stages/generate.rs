use std::sync::Arc;

use async_trait::async_trait;
use copydesk_core::types::now_rfc3339;
use copydesk_library::ContentItem;
use copydesk_providers::{ContentGenerator, GenerateRequest, GeneratedContent, Revision};
use tracing::info;

use crate::conversation::chat_turns;
use crate::error::{Result, WorkflowError};
use crate::stage::{StageContext, StageHandler, StageReply, Validation};
use crate::types::{Stage, StageSnapshot, WorkflowSession};

const SUGGESTIONS: &[&str] = &[
    "Change the tone or style",
    "Add concrete examples or figures",
    "Restructure the sections",
    "Expand or trim a part",
];

/// Drafts the title and body. The first message writes from scratch; later
/// messages revise the current draft with the stage conversation as context.
pub struct GenerateStage {
    generator: Arc<dyn ContentGenerator>,
}

impl GenerateStage {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

fn apply(content: &mut ContentItem, draft: GeneratedContent, replace_prompts: bool) {
    content.title = draft.title;
    content.body = draft.body;
    if replace_prompts || !draft.image_prompts.is_empty() {
        content.image_prompts = draft.image_prompts;
    }
    content.token_usage += draft.token_usage;
}

#[async_trait]
impl StageHandler for GenerateStage {
    fn stage(&self) -> Stage {
        Stage::Generate
    }

    async fn process(&self, ctx: StageContext<'_>, message: &str) -> Result<StageReply> {
        let message = message.trim();
        let revising = !ctx.history.is_empty();
        let mut req = GenerateRequest::fresh(ctx.session.content_kind, ctx.session.topic_hint.clone());
        req.instructions = (!message.is_empty()).then(|| message.to_string());
        req.prompt_override = ctx.prompt_override.map(str::to_string);
        if revising {
            req.revision = Some(Revision {
                current_title: ctx.content.title.clone(),
                current_body: ctx.content.body.clone(),
                history: chat_turns(ctx.history),
            });
        }

        let draft = self.generator.generate(&req).await?;
        let tokens = draft.token_usage;
        apply(ctx.content, draft, false);

        info!(
            session_id = %ctx.session.id,
            content_id = %ctx.content.id,
            tokens,
            revising,
            "generate stage processed"
        );

        let verb = if revising { "Revised" } else { "Drafted" };
        let mut reply = StageReply::new(format!("{verb} \"{}\"", ctx.content.title))
            .with_preview(ctx.content)
            .with_suggestions(SUGGESTIONS)
            .with_metadata(serde_json::json!({ "token_usage": tokens }));
        if !self.can_proceed(ctx.content) {
            reply = reply.blocked();
        }
        Ok(reply)
    }

    async fn auto_execute(&self, ctx: StageContext<'_>) -> Result<StageReply> {
        let req = GenerateRequest::fresh(ctx.session.content_kind, ctx.session.topic_hint.clone());
        let draft = self.generator.generate(&req).await?;
        let tokens = draft.token_usage;
        apply(ctx.content, draft, true);

        let check = self.validate(ctx.content);
        if !check.valid {
            return Err(WorkflowError::StageIncomplete {
                stage: Stage::Generate,
                reason: check.reason.unwrap_or_default(),
            });
        }

        info!(session_id = %ctx.session.id, content_id = %ctx.content.id, tokens, "generate stage auto");
        Ok(StageReply::new(format!("Drafted \"{}\"", ctx.content.title)).with_preview(ctx.content))
    }

    fn snapshot(&self, _session: &WorkflowSession, content: &ContentItem) -> StageSnapshot {
        StageSnapshot::Generate {
            title: content.title.clone(),
            body: content.body.clone(),
            image_prompts: content.image_prompts.clone(),
            token_usage: content.token_usage,
            completed_at: now_rfc3339(),
        }
    }

    fn validate(&self, content: &ContentItem) -> Validation {
        match (content.title.trim().is_empty(), content.body.trim().is_empty()) {
            (false, false) => Validation::ok(),
            (true, true) => Validation::invalid("no draft yet"),
            (true, false) => Validation::invalid("draft has no title"),
            (false, true) => Validation::invalid("draft has no body"),
        }
    }
}

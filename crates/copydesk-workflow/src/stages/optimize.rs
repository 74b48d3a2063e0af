use std::sync::Arc;

use async_trait::async_trait;
use copydesk_core::types::now_rfc3339;
use copydesk_library::ContentItem;
use copydesk_providers::{ContentGenerator, OptimizeRequest};
use tracing::info;

use crate::error::Result;
use crate::stage::{StageContext, StageHandler, StageReply};
use crate::types::{Stage, StageSnapshot, WorkflowSession};

const SUGGESTIONS: &[&str] = &[
    "Make it more conversational",
    "Tighten the opening",
    "Keep the original structure",
];

/// Rewrites the draft so it reads less machine-made. Runs on entry and on
/// every message, with the message as extra instructions.
pub struct OptimizeStage {
    generator: Arc<dyn ContentGenerator>,
}

impl OptimizeStage {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }

    async fn rewrite(&self, ctx: &mut StageContext<'_>, instructions: Option<String>) -> Result<u64> {
        let req = OptimizeRequest {
            content_kind: ctx.session.content_kind,
            title: ctx.content.title.clone(),
            body: ctx.content.body.clone(),
            instructions,
            prompt_override: ctx.prompt_override.map(str::to_string),
        };
        let out = self.generator.optimize(&req).await?;
        ctx.content.title = out.title;
        ctx.content.body = out.body;
        ctx.content.token_usage += out.token_usage;
        Ok(out.token_usage)
    }
}

#[async_trait]
impl StageHandler for OptimizeStage {
    fn stage(&self) -> Stage {
        Stage::Optimize
    }

    async fn process(&self, mut ctx: StageContext<'_>, message: &str) -> Result<StageReply> {
        let message = message.trim();
        let instructions = (!message.is_empty()).then(|| message.to_string());
        let tokens = self.rewrite(&mut ctx, instructions).await?;

        info!(session_id = %ctx.session.id, content_id = %ctx.content.id, tokens, "optimize stage processed");
        Ok(StageReply::new("Rewrite finished")
            .with_preview(ctx.content)
            .with_suggestions(SUGGESTIONS)
            .with_metadata(serde_json::json!({ "token_usage": tokens })))
    }

    async fn auto_execute(&self, mut ctx: StageContext<'_>) -> Result<StageReply> {
        let tokens = self.rewrite(&mut ctx, None).await?;
        info!(session_id = %ctx.session.id, content_id = %ctx.content.id, tokens, "optimize stage auto");
        Ok(StageReply::new("Rewrite finished").with_preview(ctx.content))
    }

    fn snapshot(&self, session: &WorkflowSession, content: &ContentItem) -> StageSnapshot {
        let (original_title, original_body) = match session.stage_data.get(Stage::Generate) {
            Some(StageSnapshot::Generate { title, body, .. }) => (Some(title.clone()), Some(body.clone())),
            _ => (None, None),
        };
        StageSnapshot::Optimize {
            original_title,
            original_body,
            title: content.title.clone(),
            body: content.body.clone(),
            token_usage: content.token_usage,
            completed_at: now_rfc3339(),
        }
    }
}

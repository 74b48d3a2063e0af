use std::sync::Arc;

use async_trait::async_trait;
use copydesk_core::types::now_rfc3339;
use copydesk_library::{ContentItem, ImageAsset};
use copydesk_providers::{
    ContentGenerator, ImageBatch, ImageGenerator, RenderedImage, RewriteRequest, RewriteTarget,
};
use tracing::{info, warn};

use crate::error::Result;
use crate::stage::{StageContext, StageHandler, StageReply};
use crate::types::{Stage, StageSnapshot, WorkflowSession};

/// Upper bound on illustration prompts per content item.
pub const MAX_IMAGES: usize = 5;

const SUGGESTIONS: &[&str] = &[
    "generate all",
    "cover",
    "revise 1: <change>",
    "add <description>",
    "skip",
];

#[derive(Debug, PartialEq, Eq)]
enum Intent {
    Skip,
    GenerateAll,
    GenerateOne(usize),
    Revise { index: usize, request: String },
    Add(String),
    Unknown,
}

fn parse_intent(message: &str) -> Intent {
    let lower = message.trim().to_lowercase();
    if ["skip", "no images", "not needed"].iter().any(|k| lower.contains(k)) {
        return Intent::Skip;
    }
    if ["generate all", "render all", "all images", "start"].iter().any(|k| lower.contains(k)) {
        return Intent::GenerateAll;
    }
    if ["revise", "change", "modify"].iter().any(|k| lower.starts_with(k)) {
        let index = first_number(&lower).unwrap_or(1).saturating_sub(1);
        return Intent::Revise {
            index,
            request: message.trim().to_string(),
        };
    }
    if lower.contains("cover") {
        return Intent::GenerateOne(0);
    }
    if let Some(n) = number_after(&lower, "image") {
        return Intent::GenerateOne(n.saturating_sub(1));
    }
    if let Some(rest) = ["add", "new"].iter().find_map(|k| lower.strip_prefix(k).map(|_| k.len())) {
        let desc = message.trim()[rest..].trim_start_matches([':', ',', ' ']).trim();
        return Intent::Add(desc.to_string());
    }
    if message.trim().chars().count() > 10 {
        return Intent::Add(message.trim().to_string());
    }
    Intent::Unknown
}

fn number_after(haystack: &str, keyword: &str) -> Option<usize> {
    let pos = haystack.find(keyword)?;
    let rest = haystack[pos + keyword.len()..].trim_start().trim_start_matches('#');
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn first_number(s: &str) -> Option<usize> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn to_asset(img: RenderedImage) -> ImageAsset {
    ImageAsset {
        url: img.url,
        path: img.path,
        index: img.index,
    }
}

fn numbered(prompts: &[String]) -> String {
    prompts
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, p))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plans and renders illustrations. Always allows moving on.
pub struct ImageStage {
    generator: Arc<dyn ContentGenerator>,
    images: Arc<dyn ImageGenerator>,
}

impl ImageStage {
    pub fn new(generator: Arc<dyn ContentGenerator>, images: Arc<dyn ImageGenerator>) -> Self {
        Self { generator, images }
    }

    async fn render_all(&self, content: &mut ContentItem) -> Result<ImageBatch> {
        let prompts: Vec<String> = content.image_prompts.iter().take(MAX_IMAGES).cloned().collect();
        let batch = self.images.generate_many(&content.id, &prompts).await?;
        if batch.success_count > 0 {
            content.images = batch.images.iter().cloned().map(to_asset).collect();
        }
        Ok(batch)
    }

    /// Opening turn: list the planned prompts, asking the generator for
    /// some when the draft has none yet.
    async fn opening(&self, ctx: StageContext<'_>) -> Result<StageReply> {
        if ctx.content.image_prompts.is_empty() {
            match self
                .generator
                .suggest_image_prompts(&ctx.content.title, &ctx.content.body, MAX_IMAGES)
                .await
            {
                Ok(prompts) => ctx.content.image_prompts = prompts,
                Err(e) => {
                    warn!(session_id = %ctx.session.id, error = %e, "image prompt suggestion failed");
                    return Ok(StageReply::new(format!(
                        "Could not plan illustrations ({e}). Describe one with \"add ...\" or say \"skip\"."
                    ))
                    .with_suggestions(&["skip", "add <description>"]));
                }
            }
        }
        Ok(StageReply::new(format!(
            "Planned {} illustrations:\n{}\n\nSay \"generate all\", \"revise N: ...\" or \"skip\".",
            ctx.content.image_prompts.len(),
            numbered(&ctx.content.image_prompts)
        ))
        .with_preview(ctx.content)
        .with_suggestions(SUGGESTIONS))
    }
}

#[async_trait]
impl StageHandler for ImageStage {
    fn stage(&self) -> Stage {
        Stage::Image
    }

    async fn process(&self, ctx: StageContext<'_>, message: &str) -> Result<StageReply> {
        if ctx.history.is_empty() && message.trim().is_empty() {
            return self.opening(ctx).await;
        }

        let reply = match parse_intent(message) {
            Intent::Skip => StageReply::new("Skipping illustrations."),
            Intent::GenerateAll => {
                if ctx.content.image_prompts.is_empty() {
                    return Ok(StageReply::new("There are no illustration prompts yet. Add one first.")
                        .with_suggestions(&["add <description>", "skip"]));
                }
                let batch = self.render_all(ctx.content).await?;
                let mut text = format!("Rendered {} images.", batch.success_count);
                if !batch.errors.is_empty() {
                    let failed: Vec<String> = batch
                        .errors
                        .iter()
                        .map(|e| format!("#{} ({})", e.index + 1, e.error))
                        .collect();
                    text.push_str(&format!(" Failed: {}", failed.join(", ")));
                }
                StageReply::new(text)
                    .with_preview(ctx.content)
                    .with_metadata(serde_json::json!({ "generated_count": batch.success_count }))
            }
            Intent::GenerateOne(index) => {
                let Some(prompt) = ctx.content.image_prompts.get(index).cloned() else {
                    return Ok(StageReply::new(format!(
                        "There is no prompt #{}; {} prompts are planned.",
                        index + 1,
                        ctx.content.image_prompts.len()
                    ))
                    .with_suggestions(SUGGESTIONS));
                };
                let batch = self.images.generate_many(&ctx.content.id, &[prompt]).await?;
                match batch.images.into_iter().next() {
                    Some(img) => {
                        let asset = ImageAsset { index, ..to_asset(img) };
                        ctx.content.images.retain(|a| a.index != index);
                        ctx.content.images.push(asset);
                        ctx.content.images.sort_by_key(|a| a.index);
                        StageReply::new(format!("Image #{} rendered.", index + 1)).with_preview(ctx.content)
                    }
                    None => {
                        let reason = batch
                            .errors
                            .first()
                            .map(|e| e.error.clone())
                            .unwrap_or_else(|| "unknown error".to_string());
                        StageReply::new(format!("Image #{} failed: {reason}", index + 1))
                    }
                }
            }
            Intent::Revise { index, request } => {
                let Some(original) = ctx.content.image_prompts.get(index).cloned() else {
                    return Ok(StageReply::new(format!("There is no prompt #{} to revise.", index + 1)));
                };
                let revised = self
                    .generator
                    .rewrite(&RewriteRequest {
                        target: RewriteTarget::ImagePrompt,
                        text: original.clone(),
                        instructions: request,
                    })
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "image prompt rewrite failed, keeping original");
                        original
                    });
                ctx.content.image_prompts[index] = revised.clone();
                StageReply::new(format!("Prompt #{} is now:\n{revised}", index + 1)).with_preview(ctx.content)
            }
            Intent::Add(desc) => {
                if ctx.content.image_prompts.len() >= MAX_IMAGES {
                    StageReply::new(format!("At most {MAX_IMAGES} illustrations are allowed."))
                } else if desc.chars().count() < 5 {
                    StageReply::new("That description is too short, please add detail.")
                } else {
                    ctx.content.image_prompts.push(desc.clone());
                    StageReply::new(format!(
                        "Added prompt #{}:\n{desc}",
                        ctx.content.image_prompts.len()
                    ))
                    .with_preview(ctx.content)
                }
            }
            Intent::Unknown => {
                let mut text = "Sorry, I did not catch that.".to_string();
                if !ctx.content.image_prompts.is_empty() {
                    text.push_str(&format!("\nCurrent prompts:\n{}", numbered(&ctx.content.image_prompts)));
                }
                StageReply::new(text)
            }
        };
        Ok(reply.with_suggestions(SUGGESTIONS))
    }

    async fn auto_execute(&self, ctx: StageContext<'_>) -> Result<StageReply> {
        if ctx.content.image_prompts.is_empty() {
            ctx.content.image_prompts = self
                .generator
                .suggest_image_prompts(&ctx.content.title, &ctx.content.body, MAX_IMAGES)
                .await?;
        }
        if ctx.content.image_prompts.is_empty() {
            return Ok(StageReply::new("No illustrations planned."));
        }

        let batch = self.render_all(ctx.content).await?;
        info!(
            session_id = %ctx.session.id,
            content_id = %ctx.content.id,
            success_count = batch.success_count,
            error_count = batch.errors.len(),
            "image stage auto"
        );
        Ok(StageReply::new(format!("Rendered {} images.", batch.success_count)).with_preview(ctx.content))
    }

    fn snapshot(&self, _session: &WorkflowSession, content: &ContentItem) -> StageSnapshot {
        StageSnapshot::Image {
            image_prompts: content.image_prompts.clone(),
            images: content.images.clone(),
            completed_at: now_rfc3339(),
        }
    }
}

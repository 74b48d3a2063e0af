use std::sync::Arc;

use async_trait::async_trait;
use copydesk_core::types::now_rfc3339;
use copydesk_library::ContentItem;
use copydesk_providers::{ContentGenerator, RewriteRequest, RewriteTarget};
use tracing::{info, warn};

use crate::error::Result;
use crate::stage::{StageContext, StageHandler, StageReply, Validation};
use crate::types::{Stage, StageSnapshot, WorkflowSession};

const SUGGESTIONS: &[&str] = &["title: <new title>", "paragraph 2: <change>", "confirm"];

#[derive(Debug, PartialEq, Eq)]
enum Intent {
    Confirm,
    Retitle(Option<String>),
    Paragraph { number: usize, request: String },
    Unknown,
}

fn parse_intent(message: &str) -> Intent {
    let trimmed = message.trim();
    let lower = trimmed.to_lowercase();
    if ["confirm", "done", "looks good", "approve"].iter().any(|k| lower.starts_with(k)) {
        return Intent::Confirm;
    }
    if lower.starts_with("title") {
        let rest = trimmed["title".len()..]
            .trim_start()
            .trim_start_matches(':')
            .trim_start();
        let rest = rest.strip_prefix("to ").unwrap_or(rest).trim().trim_matches('"');
        return Intent::Retitle((!rest.is_empty()).then(|| rest.to_string()));
    }
    if let Some(rest) = lower.strip_prefix("paragraph") {
        let digits: String = rest.trim_start().chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(number) = digits.parse() {
            return Intent::Paragraph {
                number,
                request: trimmed.to_string(),
            };
        }
    }
    Intent::Unknown
}

fn paragraphs(body: &str) -> usize {
    body.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Collapse runs of blank lines, trim each line and the whole body.
fn normalize_whitespace(body: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in body.lines().map(str::trim) {
        if line.is_empty() && out.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Final review: retitling, paragraph edits and confirmation.
pub struct EditStage {
    generator: Arc<dyn ContentGenerator>,
}

impl EditStage {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageHandler for EditStage {
    fn stage(&self) -> Stage {
        Stage::Edit
    }

    async fn process(&self, ctx: StageContext<'_>, message: &str) -> Result<StageReply> {
        if ctx.history.is_empty() && message.trim().is_empty() {
            return Ok(StageReply::new(format!(
                "Ready for review:\n- title: {}\n- body: {} paragraphs\n- images: {}",
                ctx.content.title,
                paragraphs(&ctx.content.body),
                ctx.content.images.len()
            ))
            .with_preview(ctx.content)
            .with_suggestions(SUGGESTIONS));
        }

        let reply = match parse_intent(message) {
            Intent::Confirm => StageReply::new(format!("\"{}\" is ready.", ctx.content.title))
                .with_preview(ctx.content)
                .with_metadata(serde_json::json!({ "confirmed": true })),
            Intent::Retitle(None) => StageReply::new(format!(
                "Current title: {}\nSend \"title: <new title>\" to change it.",
                ctx.content.title
            )),
            Intent::Retitle(Some(title)) => {
                ctx.content.title = title;
                StageReply::new(format!("Title changed to: {}", ctx.content.title)).with_preview(ctx.content)
            }
            Intent::Paragraph { number, request } => {
                let mut lines: Vec<String> = ctx.content.body.split('\n').map(str::to_string).collect();
                if number == 0 || number > lines.len() {
                    return Ok(StageReply::new(format!(
                        "The body has {} paragraphs; pick one of them.",
                        lines.len()
                    ))
                    .with_suggestions(SUGGESTIONS));
                }
                let original = lines[number - 1].clone();
                match self
                    .generator
                    .rewrite(&RewriteRequest {
                        target: RewriteTarget::Paragraph,
                        text: original,
                        instructions: request,
                    })
                    .await
                {
                    Ok(rewritten) => {
                        lines[number - 1] = rewritten;
                        ctx.content.body = lines.join("\n");
                        let preview: String = lines[number - 1].chars().take(200).collect();
                        StageReply::new(format!("Paragraph {number} updated:\n{preview}"))
                            .with_preview(ctx.content)
                    }
                    Err(e) => {
                        warn!(session_id = %ctx.session.id, error = %e, "paragraph rewrite failed");
                        StageReply::new(format!("Could not rewrite paragraph {number}: {e}"))
                    }
                }
            }
            Intent::Unknown => StageReply::new(
                "Send \"title: ...\" to retitle, \"paragraph N: ...\" to rework a paragraph, or \"confirm\".",
            ),
        };

        let mut reply = reply.with_suggestions(SUGGESTIONS);
        if !self.can_proceed(ctx.content) {
            reply = reply.blocked();
        }
        Ok(reply)
    }

    async fn auto_execute(&self, ctx: StageContext<'_>) -> Result<StageReply> {
        ctx.content.title = ctx.content.title.trim().to_string();
        ctx.content.body = normalize_whitespace(&ctx.content.body);
        info!(session_id = %ctx.session.id, content_id = %ctx.content.id, "edit stage auto");
        Ok(StageReply::new("Final draft prepared.").with_preview(ctx.content))
    }

    fn snapshot(&self, _session: &WorkflowSession, content: &ContentItem) -> StageSnapshot {
        StageSnapshot::Edit {
            title: content.title.clone(),
            body: content.body.clone(),
            images: content.images.clone(),
            completed_at: now_rfc3339(),
        }
    }

    fn validate(&self, content: &ContentItem) -> Validation {
        if content.has_content() {
            Validation::ok()
        } else {
            Validation::invalid("title and body must not be empty")
        }
    }
}

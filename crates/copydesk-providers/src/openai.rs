use async_trait::async_trait;
use copydesk_core::config::ChatProviderConfig;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::prompt;
use crate::provider::ContentGenerator;
use crate::types::{
    GenerateRequest, GeneratedContent, OptimizeRequest, OptimizedContent, RewriteRequest,
    RewriteTarget,
};

/// Longest slice of a draft sent back as revision or prompt-suggestion context.
const CONTEXT_CHARS: usize = 3000;

/// Drafting client for any OpenAI-compatible chat completions endpoint.
///
/// Optimization may use a separate model (and key); it falls back to the
/// generation settings when none is configured.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    generation: ChatProviderConfig,
    optimization: ChatProviderConfig,
}

impl OpenAiGenerator {
    pub fn new(generation: ChatProviderConfig, optimization: Option<ChatProviderConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            optimization: optimization.unwrap_or_else(|| generation.clone()),
            generation,
        }
    }

    async fn complete(
        &self,
        cfg: &ChatProviderConfig,
        system: &str,
        messages: Vec<serde_json::Value>,
        json_mode: bool,
    ) -> Result<Completion> {
        let body = build_request_body(cfg, system, messages, json_mode);
        let url = format!("{}/v1/chat/completions", cfg.base_url.trim_end_matches('/'));

        debug!(model = %cfg.model, json_mode, "sending chat completion");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(ProviderError::Unavailable(format!(
                "rate limited, retry after {retry}s"
            )));
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat completion API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }

    async fn complete_json<T: for<'de> Deserialize<'de>>(
        &self,
        cfg: &ChatProviderConfig,
        system: &str,
        messages: Vec<serde_json::Value>,
    ) -> Result<(T, u64)> {
        let completion = self.complete(cfg, system, messages, true).await?;
        let parsed = serde_json::from_str(strip_code_fence(&completion.content))
            .map_err(|e| ProviderError::Parse(format!("model returned invalid JSON: {e}")))?;
        Ok((parsed, completion.total_tokens))
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GeneratedContent> {
        let system = req.prompt_override.clone().unwrap_or_else(|| {
            prompt::drafting_prompt(req.content_kind, self.generation.system_prompt.as_deref())
        });
        let messages = generate_messages(req);
        let (draft, tokens): (DraftPayload, u64) =
            self.complete_json(&self.generation, &system, messages).await?;

        // A revision that omits a field keeps the current text.
        let (title, body) = match &req.revision {
            Some(rev) => (
                draft.title.unwrap_or_else(|| rev.current_title.clone()),
                draft.content.unwrap_or_else(|| rev.current_body.clone()),
            ),
            None => (
                draft.title.unwrap_or_default(),
                draft.content.unwrap_or_default(),
            ),
        };
        Ok(GeneratedContent {
            title,
            body,
            image_prompts: draft.image_prompts,
            token_usage: tokens,
        })
    }

    async fn optimize(&self, req: &OptimizeRequest) -> Result<OptimizedContent> {
        let system = req
            .prompt_override
            .as_deref()
            .unwrap_or(prompt::OPTIMIZE_PROMPT);
        let mut user = format!("Rewrite the following text.\n\nTitle: {}\n\nBody:\n{}", req.title, req.body);
        if let Some(instructions) = req.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
            user.push_str(&format!("\n\nAdditional requests: {instructions}"));
        }
        let (draft, tokens): (DraftPayload, u64) = self
            .complete_json(&self.optimization, system, vec![user_message(&user)])
            .await?;
        Ok(OptimizedContent {
            title: draft.title.unwrap_or_else(|| req.title.clone()),
            body: draft.content.unwrap_or_else(|| req.body.clone()),
            token_usage: tokens,
        })
    }

    async fn suggest_image_prompts(&self, title: &str, body: &str, max: usize) -> Result<Vec<String>> {
        let user = format!(
            "Describe illustrations for this article.\n\nTitle: {title}\n\nBody:\n{}",
            truncate_chars(body, CONTEXT_CHARS)
        );
        let (payload, _): (PromptsPayload, u64) = self
            .complete_json(&self.generation, prompt::IMAGE_PROMPTS_PROMPT, vec![user_message(&user)])
            .await?;
        Ok(payload
            .prompts
            .into_iter()
            .map(|p| p.description)
            .filter(|d| !d.trim().is_empty())
            .take(max)
            .collect())
    }

    async fn rewrite(&self, req: &RewriteRequest) -> Result<String> {
        let system = match req.target {
            RewriteTarget::Paragraph => prompt::PARAGRAPH_REWRITE_PROMPT,
            RewriteTarget::ImagePrompt => prompt::IMAGE_PROMPT_REWRITE_PROMPT,
        };
        let user = format!("Original:\n{}\n\nRequest: {}", req.text, req.instructions);
        let completion = self
            .complete(&self.generation, system, vec![user_message(&user)], false)
            .await?;
        let text = completion.content.trim();
        if text.is_empty() {
            return Err(ProviderError::Parse("empty rewrite".to_string()));
        }
        Ok(text.to_string())
    }
}

fn user_message(content: &str) -> serde_json::Value {
    serde_json::json!({ "role": "user", "content": content })
}

/// First drafts send only the request; revisions replay the stage
/// conversation and append the current draft as context.
fn generate_messages(req: &GenerateRequest) -> Vec<serde_json::Value> {
    let mut ask = match (&req.instructions, &req.topic_hint) {
        (Some(i), _) if !i.trim().is_empty() => i.clone(),
        (_, Some(topic)) if !topic.trim().is_empty() => format!("Write about: {topic}"),
        _ => prompt::OPEN_TOPIC_REQUEST.to_string(),
    };

    let Some(rev) = &req.revision else {
        return vec![user_message(&ask)];
    };

    let mut messages: Vec<serde_json::Value> = rev
        .history
        .iter()
        .map(|t| serde_json::json!({ "role": t.role, "content": t.content }))
        .collect();
    if !rev.current_body.is_empty() {
        ask.push_str(&format!(
            "\n\nCurrent draft:\nTitle: {}\nBody:\n{}",
            rev.current_title,
            truncate_chars(&rev.current_body, CONTEXT_CHARS)
        ));
    }
    messages.push(user_message(&ask));
    messages
}

fn build_request_body(
    cfg: &ChatProviderConfig,
    system: &str,
    messages: Vec<serde_json::Value>,
    json_mode: bool,
) -> serde_json::Value {
    let mut all = Vec::with_capacity(messages.len() + 1);
    all.push(serde_json::json!({ "role": "system", "content": system }));
    all.extend(messages);

    let mut body = serde_json::json!({
        "model": cfg.model,
        "messages": all,
        "temperature": cfg.temperature,
    });
    if json_mode {
        body["response_format"] = serde_json::json!({ "type": "json_object" });
    }
    body
}

/// Models sometimes wrap JSON in a markdown fence despite being told not to.
fn strip_code_fence(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    }
    s.strip_suffix("```").unwrap_or(s).trim()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

struct Completion {
    content: String,
    total_tokens: u64,
}

fn parse_response(resp: ApiResponse) -> Completion {
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    Completion {
        content,
        total_tokens: resp.usage.map(|u| u.total_tokens).unwrap_or(0),
    }
}

#[derive(Deserialize)]
struct DraftPayload {
    title: Option<String>,
    #[serde(alias = "body")]
    content: Option<String>,
    #[serde(default)]
    image_prompts: Vec<String>,
}

#[derive(Deserialize)]
struct PromptsPayload {
    #[serde(default)]
    prompts: Vec<PromptEntry>,
}

#[derive(Deserialize)]
struct PromptEntry {
    description: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use copydesk_core::ContentKind;

    use super::*;
    use crate::types::{ChatTurn, Revision};

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn first_draft_uses_topic_hint() {
        let req = GenerateRequest::fresh(ContentKind::Article, Some("tidal power".into()));
        let messages = generate_messages(&req);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "Write about: tidal power");
    }

    #[test]
    fn revision_replays_history_and_appends_draft() {
        let mut req = GenerateRequest::fresh(ContentKind::Article, None);
        req.instructions = Some("shorter please".into());
        req.revision = Some(Revision {
            current_title: "T".into(),
            current_body: "B".into(),
            history: vec![ChatTurn::user("write"), ChatTurn::assistant("done")],
        });
        let messages = generate_messages(&req);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        let last = messages[2]["content"].as_str().unwrap();
        assert!(last.starts_with("shorter please"));
        assert!(last.contains("Title: T"));
    }

    #[test]
    fn draft_payload_accepts_body_alias() {
        let d: DraftPayload = serde_json::from_str(r#"{"title":"x","body":"y"}"#).unwrap();
        assert_eq!(d.content.as_deref(), Some("y"));
        assert!(d.image_prompts.is_empty());
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}

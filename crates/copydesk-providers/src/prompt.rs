//! Built-in system prompts. Config `system_prompt` or a per-call override
//! replaces the drafting and rewriting prompts; the helper prompts are fixed.

use copydesk_core::ContentKind;

const JSON_DRAFT_CONTRACT: &str = "Reply with a single JSON object of the form \
{\"title\": string, \"content\": string, \"image_prompts\": [string]}. \
Separate paragraphs in `content` with a newline. Do not wrap the JSON in markdown.";

pub const ARTICLE_PROMPT: &str = "You are a staff writer for a popular news and \
culture feed. Write engaging long-form articles with a clear point of view, concrete \
examples and short paragraphs that read well on a phone. Suggest up to five \
illustration prompts that describe photographs or illustrations without any text in them.";

pub const MICROBLOG_PROMPT: &str = "You write short social posts of at most 300 \
characters. Be direct and conversational, end with a question or a hook. The `title` \
field is a one-line internal label and is never published.";

pub const OPTIMIZE_PROMPT: &str = "You are an editor who rewrites machine-drafted \
text so it reads as if a person wrote it: vary sentence length, remove filler and \
cliches, keep every fact and the overall structure. Reply with a single JSON object \
{\"title\": string, \"content\": string}.";

pub const IMAGE_PROMPTS_PROMPT: &str = "You describe illustrations for articles. \
Each description must be concrete enough for an image model, relevant to the text and \
contain no lettering. Reply with a JSON object {\"prompts\": [{\"description\": string, \
\"position\": \"cover\" | \"body\"}]}.";

pub const PARAGRAPH_REWRITE_PROMPT: &str = "You are a copy editor. Rewrite the given \
paragraph following the request and return only the new paragraph text.";

pub const IMAGE_PROMPT_REWRITE_PROMPT: &str = "You refine illustration descriptions. \
Apply the request to the given description and return only the new description as \
plain text.";

/// Topic used when neither a hint nor instructions are available.
pub const OPEN_TOPIC_REQUEST: &str = "Pick a currently trending subject yourself and \
write about it with depth and a clear opinion.";

/// Default drafting prompt for a content kind, with the JSON contract appended.
pub fn drafting_prompt(kind: ContentKind, configured: Option<&str>) -> String {
    let base = configured.unwrap_or(match kind {
        ContentKind::Article => ARTICLE_PROMPT,
        ContentKind::Microblog => MICROBLOG_PROMPT,
    });
    format!("{base}\n\n{JSON_DRAFT_CONTRACT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_prompt_keeps_json_contract() {
        let p = drafting_prompt(ContentKind::Article, Some("Write about cats."));
        assert!(p.starts_with("Write about cats."));
        assert!(p.contains("image_prompts"));
    }

    #[test]
    fn kind_selects_builtin() {
        assert!(drafting_prompt(ContentKind::Microblog, None).contains("300"));
    }
}

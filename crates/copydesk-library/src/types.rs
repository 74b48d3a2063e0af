use copydesk_core::ContentKind;
use serde::{Deserialize, Serialize};

/// Lifecycle of a content item from draft to the publishing platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[default]
    Draft,
    Publishing,
    Published,
    Failed,
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentStatus::Draft => write!(f, "draft"),
            ContentStatus::Publishing => write!(f, "publishing"),
            ContentStatus::Published => write!(f, "published"),
            ContentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ContentStatus::Draft),
            "publishing" => Ok(ContentStatus::Publishing),
            "published" => Ok(ContentStatus::Published),
            "failed" => Ok(ContentStatus::Failed),
            other => Err(format!("unknown content status: {}", other)),
        }
    }
}

/// A rendered illustration attached to a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub url: String,
    /// Local file, when the image generator downloaded one.
    pub path: Option<String>,
    /// Position of the prompt this image was rendered from.
    pub index: usize,
}

/// One piece of content produced by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// UUIDv7 primary key.
    pub id: String,
    pub content_kind: ContentKind,
    pub title: String,
    pub body: String,
    /// Topic hint the draft was generated from, if any.
    pub topic: Option<String>,
    pub status: ContentStatus,
    /// Stored as JSON arrays in SQLite.
    pub image_prompts: Vec<String>,
    pub images: Vec<ImageAsset>,
    pub tags: Vec<String>,
    /// Cumulative tokens spent on this item across all stages.
    pub token_usage: u64,
    pub publish_url: Option<String>,
    pub error_message: Option<String>,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ContentItem {
    /// Fresh, empty draft.
    pub fn draft(content_kind: ContentKind, topic: Option<String>) -> Self {
        let now = copydesk_core::types::now_rfc3339();
        Self {
            id: copydesk_core::types::new_id(),
            content_kind,
            title: String::new(),
            body: String::new(),
            topic,
            status: ContentStatus::Draft,
            image_prompts: Vec::new(),
            images: Vec::new(),
            tags: Vec::new(),
            token_usage: 0,
            publish_url: None,
            error_message: None,
            published_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn has_content(&self) -> bool {
        !self.title.trim().is_empty() && !self.body.trim().is_empty()
    }

    /// Local paths of rendered images, in prompt order.
    pub fn image_paths(&self) -> Vec<String> {
        self.images.iter().filter_map(|i| i.path.clone()).collect()
    }

    /// First `max_chars` characters of the body, with an ellipsis when cut.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.body.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Expired,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "active"),
            AccountStatus::Inactive => write!(f, "inactive"),
            AccountStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "expired" => Ok(AccountStatus::Expired),
            other => Err(format!("unknown account status: {}", other)),
        }
    }
}

/// A publishing account on the target platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub nickname: String,
    /// The platform's own user id.
    pub platform_uid: String,
    /// Session cookies captured at login, handed verbatim to the publisher.
    pub credentials: serde_json::Value,
    pub status: AccountStatus,
    pub last_publish_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Account {
    pub fn is_usable(&self) -> bool {
        self.status == AccountStatus::Active && !self.credentials.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_cuts_on_char_boundaries() {
        let mut item = ContentItem::draft(ContentKind::Article, None);
        item.body = "héllo wörld".to_string();
        assert_eq!(item.preview(5), "héllo...");
        assert_eq!(item.preview(50), "héllo wörld");
    }

    #[test]
    fn blank_title_is_not_content() {
        let mut item = ContentItem::draft(ContentKind::Microblog, None);
        item.body = "body".to_string();
        item.title = "   ".to_string();
        assert!(!item.has_content());
        item.title = "t".to_string();
        assert!(item.has_content());
    }

    #[test]
    fn status_text_round_trip() {
        for s in ["draft", "publishing", "published", "failed"] {
            assert_eq!(s.parse::<ContentStatus>().unwrap().to_string(), s);
        }
        assert!("archived".parse::<AccountStatus>().is_err());
    }
}

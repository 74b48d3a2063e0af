use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// New primary key for any persisted record (UUIDv7, time-sortable).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Current instant as the RFC3339 string every table stores.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// The two content flavours the pipeline can produce.
///
/// `Article` is long-form with a headline; `Microblog` is a short post whose
/// title is never shown by the publishing platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Article,
    Microblog,
}

impl ContentKind {
    /// Whether the publisher should receive a headline for this kind.
    pub fn has_title(&self) -> bool {
        matches!(self, ContentKind::Article)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Article => "article",
            ContentKind::Microblog => "microblog",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "article" => Ok(ContentKind::Article),
            "microblog" => Ok(ContentKind::Microblog),
            other => Err(format!("unknown content kind: {other}")),
        }
    }
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

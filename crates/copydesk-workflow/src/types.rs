use std::collections::BTreeMap;

use copydesk_core::{ContentKind, Role};
use copydesk_library::{ContentItem, ImageAsset};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Pipeline position of a workflow session.
///
/// Declaration order is the transition order, so `Ord` follows the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Generate,
    Optimize,
    Image,
    Edit,
    Completed,
}

impl Stage {
    /// The four stages that have a handler.
    pub const WORKING: [Stage; 4] = [Stage::Generate, Stage::Optimize, Stage::Image, Stage::Edit];

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Generate => Some(Stage::Optimize),
            Stage::Optimize => Some(Stage::Image),
            Stage::Image => Some(Stage::Edit),
            Stage::Edit => Some(Stage::Completed),
            Stage::Completed => None,
        }
    }

    /// Progress reported once the session has reached this stage.
    pub fn progress(self) -> u8 {
        match self {
            Stage::Generate => 25,
            Stage::Optimize => 50,
            Stage::Image => 75,
            Stage::Edit => 90,
            Stage::Completed => 100,
        }
    }

    /// Progress reported while an automatic run is working on this stage.
    pub fn auto_entry_progress(self) -> u8 {
        match self {
            Stage::Generate => 10,
            Stage::Optimize => 30,
            Stage::Image => 60,
            Stage::Edit => 80,
            Stage::Completed => 100,
        }
    }

    /// Slot in the handler table; `None` for `Completed`.
    pub fn handler_index(self) -> Option<usize> {
        match self {
            Stage::Generate => Some(0),
            Stage::Optimize => Some(1),
            Stage::Image => Some(2),
            Stage::Edit => Some(3),
            Stage::Completed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Optimize => "optimize",
            Stage::Image => "image",
            Stage::Edit => "edit",
            Stage::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "generate" => Ok(Stage::Generate),
            "optimize" => Ok(Stage::Optimize),
            "image" => Ok(Stage::Image),
            "edit" => Ok(Stage::Edit),
            "completed" => Ok(Stage::Completed),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    /// Replayed end to end without an operator.
    Auto,
    /// Driven message by message, stage by stage.
    Manual,
}

impl std::fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowMode::Auto => write!(f, "auto"),
            WorkflowMode::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for WorkflowMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(WorkflowMode::Auto),
            "manual" => Ok(WorkflowMode::Manual),
            other => Err(format!("unknown workflow mode: {}", other)),
        }
    }
}

/// What a stage produced, captured when the session leaves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum StageSnapshot {
    Generate {
        title: String,
        body: String,
        image_prompts: Vec<String>,
        token_usage: u64,
        completed_at: String,
    },
    Optimize {
        /// Text before the rewrite, when the generate snapshot was available.
        original_title: Option<String>,
        original_body: Option<String>,
        title: String,
        body: String,
        token_usage: u64,
        completed_at: String,
    },
    Image {
        image_prompts: Vec<String>,
        images: Vec<ImageAsset>,
        completed_at: String,
    },
    Edit {
        title: String,
        body: String,
        images: Vec<ImageAsset>,
        completed_at: String,
    },
}

impl StageSnapshot {
    pub fn stage(&self) -> Stage {
        match self {
            StageSnapshot::Generate { .. } => Stage::Generate,
            StageSnapshot::Optimize { .. } => Stage::Optimize,
            StageSnapshot::Image { .. } => Stage::Image,
            StageSnapshot::Edit { .. } => Stage::Edit,
        }
    }
}

/// Per-stage snapshots of a session. Entries are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageData(BTreeMap<Stage, StageSnapshot>);

impl StageData {
    /// Store a snapshot under its own stage. An existing entry is never
    /// replaced.
    pub fn record(&mut self, snapshot: StageSnapshot) -> Result<()> {
        let stage = snapshot.stage();
        if self.0.contains_key(&stage) {
            return Err(WorkflowError::SnapshotExists(stage));
        }
        self.0.insert(stage, snapshot);
        Ok(())
    }

    pub fn get(&self, stage: Stage) -> Option<&StageSnapshot> {
        self.0.get(&stage)
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains_key(&stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A run of the content pipeline over one content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub id: String,
    pub content_id: String,
    pub mode: WorkflowMode,
    pub content_kind: ContentKind,
    pub topic_hint: Option<String>,
    pub current_stage: Stage,
    pub stage_data: StageData,
    /// 0..=100
    pub progress: u8,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One entry of a session's stage conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub session_id: String,
    pub stage: Stage,
    pub role: Role,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// What an operator sees of the draft after a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPreview {
    pub title: String,
    pub body_preview: String,
    pub image_prompts: Vec<String>,
    pub images: Vec<ImageAsset>,
}

impl ContentPreview {
    pub const BODY_CHARS: usize = 500;

    pub fn of(item: &ContentItem) -> Self {
        Self {
            title: item.title.clone(),
            body_preview: item.preview(Self::BODY_CHARS),
            image_prompts: item.image_prompts.clone(),
            images: item.images.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageOutcome {
    pub reply: String,
    pub stage: Stage,
    pub can_proceed: bool,
    pub preview: Option<ContentPreview>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceOutcome {
    pub previous_stage: Stage,
    pub current_stage: Stage,
    pub progress: u8,
    /// Opening reply of the new stage; `None` when it failed or on completion.
    pub initial_reply: Option<String>,
    pub preview: Option<ContentPreview>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum AutoRunOutcome {
    Completed { content_id: String },
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentSummary {
    pub title: String,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub stage: Stage,
    pub progress: u8,
    pub error: Option<String>,
    /// Only present once the session is completed.
    pub summary: Option<ContentSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: WorkflowSession,
    pub content: ContentItem,
    pub messages: Vec<ConversationMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit_snapshot() -> StageSnapshot {
        StageSnapshot::Edit {
            title: "t".into(),
            body: "b".into(),
            images: vec![],
            completed_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn transitions_are_linear() {
        let mut stage = Stage::Generate;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            assert!(next.progress() > stage.progress());
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(stage, Stage::Completed);
    }

    #[test]
    fn stage_data_refuses_overwrite() {
        let mut data = StageData::default();
        data.record(edit_snapshot()).unwrap();
        let err = data.record(edit_snapshot()).unwrap_err();
        assert!(matches!(err, WorkflowError::SnapshotExists(Stage::Edit)));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn stage_data_serializes_keyed_by_stage() {
        let mut data = StageData::default();
        data.record(edit_snapshot()).unwrap();
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["edit"]["stage"], "edit");
        let back: StageData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn auto_entry_precedes_stage_progress() {
        for stage in Stage::WORKING {
            assert!(stage.auto_entry_progress() < stage.progress());
        }
    }
}

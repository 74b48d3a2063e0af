use copydesk_core::ContentKind;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Text-backed enum stored in SQLite as its snake_case name.
macro_rules! text_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", $what, ": {}"), other)),
                }
            }
        }
    };
}

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generate,
    Publish,
    GenerateAndPublish,
}

text_enum!(JobKind, "job kind", {
    Generate => "generate",
    Publish => "publish",
    GenerateAndPublish => "generate_and_publish",
});

impl JobKind {
    pub fn needs_account(&self) -> bool {
        matches!(self, JobKind::Publish | JobKind::GenerateAndPublish)
    }
}

/// When a task fires. Cron expressions and active hours are read in the
/// scheduler's configured zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Five-field crontab or the seconds-first form of the `cron` crate.
    Cron { expression: String },
    FixedInterval { minutes: u32 },
    /// Uniform random wait in `[min_minutes, max_minutes]`, clamped into the
    /// active-hours window. Re-armed only after each firing finishes.
    RandomInterval { min_minutes: u32, max_minutes: u32 },
}

impl ScheduleSpec {
    pub fn is_random(&self) -> bool {
        matches!(self, ScheduleSpec::RandomInterval { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicMode {
    /// No topic: the generator picks one.
    #[default]
    Random,
    /// Always the first configured topic.
    Fixed,
    /// Cycle through the configured topics.
    List,
}

text_enum!(TopicMode, "topic mode", {
    Random => "random",
    Fixed => "fixed",
    List => "list",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    All,
    #[default]
    One,
    Batch,
}

text_enum!(PublishMode, "publish mode", {
    All => "all",
    One => "one",
    Batch => "batch",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOrder {
    #[default]
    Oldest,
    Newest,
    Random,
}

text_enum!(PublishOrder, "publish order", {
    Oldest => "oldest",
    Newest => "newest",
    Random => "random",
});

/// Half-open local-hour window `[start_hour, end_hour)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl Default for ActiveHours {
    fn default() -> Self {
        Self {
            start_hour: 0,
            end_hour: 24,
        }
    }
}

/// A persisted scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// UUID v7 string, primary key.
    pub id: String,
    pub name: String,
    pub kind: JobKind,
    pub content_kind: ContentKind,
    pub schedule: ScheduleSpec,
    pub active_hours: ActiveHours,
    pub topic_mode: TopicMode,
    pub topics: Vec<String>,
    /// Position of the next topic under `TopicMode::List`.
    pub current_topic_index: usize,
    pub publish_mode: PublishMode,
    pub publish_batch_size: usize,
    pub publish_order: PublishOrder,
    pub account_id: Option<String>,
    pub is_active: bool,
    pub last_run_at: Option<String>,
    /// `None` while the task is inactive (or a random task is mid-run).
    pub next_run_at: Option<String>,
    pub run_count: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ScheduledTask {
    /// How many candidates one publish run may take; `None` is unbounded.
    pub fn publish_limit(&self) -> Option<usize> {
        match self.publish_mode {
            PublishMode::All => None,
            PublishMode::One => Some(1),
            PublishMode::Batch => Some(self.publish_batch_size),
        }
    }
}

/// The editable part of a task, used for both creation and updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScheduledTask {
    pub name: String,
    pub kind: JobKind,
    pub content_kind: ContentKind,
    pub schedule: ScheduleSpec,
    #[serde(default)]
    pub active_hours: ActiveHours,
    #[serde(default)]
    pub topic_mode: TopicMode,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub publish_mode: PublishMode,
    #[serde(default = "default_batch_size")]
    pub publish_batch_size: usize,
    #[serde(default)]
    pub publish_order: PublishOrder,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_batch_size() -> usize {
    1
}

fn default_active() -> bool {
    true
}

const MAX_NAME_CHARS: usize = 100;

impl NewScheduledTask {
    /// Active task over the whole day with default topic and publish settings.
    pub fn new(
        name: impl Into<String>,
        kind: JobKind,
        content_kind: ContentKind,
        schedule: ScheduleSpec,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            content_kind,
            schedule,
            active_hours: ActiveHours::default(),
            topic_mode: TopicMode::default(),
            topics: Vec::new(),
            publish_mode: PublishMode::default(),
            publish_batch_size: default_batch_size(),
            publish_order: PublishOrder::default(),
            account_id: None,
            is_active: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name_len = self.name.trim().chars().count();
        if name_len == 0 || name_len > MAX_NAME_CHARS {
            return Err(SchedulerError::InvalidTask(format!(
                "name must be 1-{MAX_NAME_CHARS} characters"
            )));
        }
        let ActiveHours {
            start_hour,
            end_hour,
        } = self.active_hours;
        if start_hour > 23 || !(1..=24).contains(&end_hour) || start_hour >= end_hour {
            return Err(SchedulerError::InvalidTask(format!(
                "active hours {start_hour}..{end_hour} must satisfy 0 <= start < end <= 24"
            )));
        }
        if self.publish_batch_size == 0 {
            return Err(SchedulerError::InvalidTask(
                "publish batch size must be at least 1".to_string(),
            ));
        }
        if self.topic_mode != TopicMode::Random && self.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(SchedulerError::InvalidTask(format!(
                "topic mode {} needs at least one topic",
                self.topic_mode
            )));
        }
        crate::schedule::validate_spec(&self.schedule)
    }
}

/// Lifecycle of one unit of work in the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(LogStatus, "log status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

/// One execution-log record. A publish run writes one per candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    pub kind: JobKind,
    pub status: LogStatus,
    pub content_id: Option<String>,
    /// `None` for ad hoc runs.
    pub scheduled_task_id: Option<String>,
    pub account_id: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub created_at: String,
}

/// Why a task fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireOrigin {
    /// The regular trigger came due.
    Scheduled,
    /// `Scheduler::trigger_now`.
    Manual,
}

/// Outcome of one task execution. Failures are carried here rather than
/// returned as errors so the scheduler loop never stops on them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub task_id: String,
    pub kind: JobKind,
    pub success: bool,
    /// Content produced by a generate step.
    pub content_id: Option<String>,
    pub published_count: usize,
    pub total_count: usize,
    pub error: Option<String>,
}

/// Messages the firing tasks send back to the scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    FiringCompleted { task_id: String, origin: FireOrigin },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub paused: bool,
    pub active_task_count: usize,
    pub pending_fire_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily() -> NewScheduledTask {
        NewScheduledTask::new(
            "morning post",
            JobKind::Generate,
            ContentKind::Article,
            ScheduleSpec::Cron {
                expression: "0 9 * * *".into(),
            },
        )
    }

    #[test]
    fn defaults_validate() {
        daily().validate().unwrap();
    }

    #[test]
    fn window_bounds() {
        for (start, end, ok) in [(0, 24, true), (9, 18, true), (18, 9, false), (5, 5, false), (0, 25, false), (24, 24, false)] {
            let mut task = daily();
            task.active_hours = ActiveHours {
                start_hour: start,
                end_hour: end,
            };
            assert_eq!(task.validate().is_ok(), ok, "{start}..{end}");
        }
    }

    #[test]
    fn rejects_bad_fields() {
        let mut task = daily();
        task.name = " ".into();
        assert!(matches!(task.validate(), Err(SchedulerError::InvalidTask(_))));

        let mut task = daily();
        task.name = "x".repeat(101);
        assert!(task.validate().is_err());

        let mut task = daily();
        task.publish_batch_size = 0;
        assert!(task.validate().is_err());

        let mut task = daily();
        task.topic_mode = TopicMode::List;
        assert!(task.validate().is_err());

        let mut task = daily();
        task.schedule = ScheduleSpec::RandomInterval {
            min_minutes: 30,
            max_minutes: 10,
        };
        assert!(matches!(task.validate(), Err(SchedulerError::InvalidSchedule(_))));
    }

    #[test]
    fn schedule_wire_format() {
        let spec: ScheduleSpec =
            serde_json::from_str(r#"{"type":"random_interval","min_minutes":30,"max_minutes":90}"#).unwrap();
        assert_eq!(
            spec,
            ScheduleSpec::RandomInterval {
                min_minutes: 30,
                max_minutes: 90
            }
        );
        assert!(spec.is_random());
        assert_eq!("generate_and_publish".parse::<JobKind>().unwrap(), JobKind::GenerateAndPublish);
    }
}

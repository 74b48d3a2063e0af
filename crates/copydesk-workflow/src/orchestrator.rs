use std::sync::Arc;

use copydesk_core::{ContentKind, Role};
use copydesk_library::{ContentItem, LibraryStore, SharedConnection};
use copydesk_providers::Publisher;
use tracing::{info, instrument, warn};

use crate::conversation::{ConversationLog, HISTORY_LIMIT, SESSION_LIMIT};
use crate::error::{Result, WorkflowError};
use crate::publishing::publish_item;
use crate::session::SessionStore;
use crate::settings::SettingsStore;
use crate::stage::{StageContext, StageHandler, StageTable};
use crate::types::{
    AdvanceOutcome, AutoRunOutcome, ContentPreview, ContentSummary, ConversationMessage,
    MessageOutcome, SessionDetail, SessionState, SessionStatus, Stage, WorkflowMode,
    WorkflowSession,
};

/// Progress shown while an automatic run hands the result to the publisher.
const PUBLISH_PROGRESS: u8 = 95;
const SUMMARY_CHARS: usize = 200;

/// Drives workflow sessions through the stage pipeline, either message by
/// message or end to end.
///
/// Callers must not run two operations on the same session concurrently;
/// different sessions are independent.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    sessions: SessionStore,
    conversations: ConversationLog,
    settings: SettingsStore,
    library: LibraryStore,
    stages: StageTable,
    publisher: Arc<dyn Publisher>,
}

impl WorkflowOrchestrator {
    pub fn new(db: SharedConnection, stages: StageTable, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            sessions: SessionStore::new(db.clone()),
            conversations: ConversationLog::new(db.clone()),
            settings: SettingsStore::new(db.clone()),
            library: LibraryStore::new(db),
            stages,
            publisher,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn library(&self) -> &LibraryStore {
        &self.library
    }

    /// Allocate a draft and a session positioned at `Generate`.
    #[instrument(skip(self))]
    pub fn create_session(
        &self,
        mode: WorkflowMode,
        content_kind: ContentKind,
        topic_hint: Option<&str>,
    ) -> Result<WorkflowSession> {
        let topic_hint = topic_hint.map(str::trim).filter(|t| !t.is_empty());
        let content = self.library.create_draft(content_kind, topic_hint)?;
        let session = self
            .sessions
            .create(&content.id, mode, content_kind, topic_hint)?;
        info!(
            session_id = %session.id,
            content_id = %content.id,
            %mode,
            kind = %content_kind,
            "workflow session created"
        );
        Ok(session)
    }

    fn handler(&self, stage: Stage) -> Result<&Arc<dyn StageHandler>> {
        // Callers rule out Completed before asking for a handler.
        self.stages
            .get(stage)
            .ok_or_else(|| WorkflowError::SessionCompleted(format!("no handler for {stage}")))
    }

    /// Feed one operator message to the current stage of a manual session.
    #[instrument(skip(self, message, prompt_override), fields(session_id = %session_id))]
    pub async fn process_message(
        &self,
        session_id: &str,
        message: &str,
        prompt_override: Option<&str>,
    ) -> Result<MessageOutcome> {
        let mut session = self.sessions.require(session_id)?;
        if session.current_stage == Stage::Completed {
            return Err(WorkflowError::SessionCompleted(session.id));
        }
        if session.mode != WorkflowMode::Manual {
            return Err(WorkflowError::WrongMode {
                session_id: session.id,
                mode: session.mode,
            });
        }

        let stage = session.current_stage;
        let handler = self.handler(stage)?;
        let history = self.conversations.history(&session.id, stage, HISTORY_LIMIT)?;
        let mut content = self.library.require(&session.content_id)?;

        let reply = handler
            .process(
                StageContext {
                    session: &session,
                    content: &mut content,
                    history: &history,
                    prompt_override,
                },
                message,
            )
            .await?;

        self.library.save(&content)?;
        self.conversations
            .append(&session.id, stage, Role::User, message, serde_json::json!({}))?;
        self.conversations
            .append(&session.id, stage, Role::Assistant, &reply.reply, reply.metadata.clone())?;
        self.sessions.save(&mut session)?;

        info!(%stage, can_proceed = reply.can_proceed, "message processed");
        Ok(MessageOutcome {
            reply: reply.reply,
            stage,
            can_proceed: reply.can_proceed,
            preview: reply.preview,
            suggestions: reply.suggestions,
        })
    }

    /// Snapshot the current stage and move to the next one.
    ///
    /// Rejected without any change when the current stage is not done. The
    /// new stage's opening reply is best effort: a failure is logged and the
    /// transition still stands.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn advance_stage(&self, session_id: &str) -> Result<AdvanceOutcome> {
        let mut session = self.sessions.require(session_id)?;
        let previous = session.current_stage;
        let Some(next) = previous.next() else {
            return Err(WorkflowError::SessionCompleted(session.id));
        };
        let handler = self.handler(previous)?;
        let mut content = self.library.require(&session.content_id)?;

        let check = handler.validate(&content);
        if !handler.can_proceed(&content) {
            return Err(WorkflowError::StageIncomplete {
                stage: previous,
                reason: check.reason.unwrap_or_else(|| "stage not finished".to_string()),
            });
        }

        let snapshot = handler.snapshot(&session, &content);
        session.stage_data.record(snapshot)?;
        session.current_stage = next;
        session.progress = next.progress();
        self.sessions.save(&mut session)?;
        info!(from = %previous, to = %next, progress = session.progress, "stage advanced");

        let mut outcome = AdvanceOutcome {
            previous_stage: previous,
            current_stage: next,
            progress: session.progress,
            initial_reply: None,
            preview: None,
            suggestions: Vec::new(),
        };
        if next == Stage::Completed {
            return Ok(outcome);
        }

        let new_handler = self.handler(next)?;
        let opening = new_handler
            .process(
                StageContext {
                    session: &session,
                    content: &mut content,
                    history: &[],
                    prompt_override: None,
                },
                "",
            )
            .await;
        match opening {
            Ok(reply) => {
                self.library.save(&content)?;
                self.conversations
                    .append(&session.id, next, Role::Assistant, &reply.reply, reply.metadata)?;
                outcome.initial_reply = Some(reply.reply);
                outcome.preview = reply.preview;
                outcome.suggestions = reply.suggestions;
            }
            Err(e) => warn!(stage = %next, error = %e, "opening reply failed"),
        }
        Ok(outcome)
    }

    /// Walk a session from its current stage to `Completed` without an
    /// operator.
    ///
    /// Optimize and image are optional: disabled in the pipeline settings or
    /// failing, they are passed over without a snapshot. A generate or edit
    /// failure stops the run and is stored on the session.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn run_automatic(&self, session_id: &str) -> Result<AutoRunOutcome> {
        let mut session = self.sessions.require(session_id)?;
        if session.current_stage == Stage::Completed {
            return Err(WorkflowError::SessionCompleted(session.id));
        }
        let settings = self.settings.get(session.content_kind)?;
        let mut content = self.library.require(&session.content_id)?;
        session.error_message = None;

        for stage in Stage::WORKING {
            if stage < session.current_stage {
                continue;
            }
            let enabled = match stage {
                Stage::Optimize => settings.enable_optimize,
                Stage::Image => settings.enable_image,
                _ => true,
            };
            if !enabled {
                info!(%stage, "stage disabled, skipping");
                session.progress = stage.progress();
                self.sessions.save(&mut session)?;
                continue;
            }

            session.current_stage = stage;
            session.progress = stage.auto_entry_progress();
            self.sessions.save(&mut session)?;

            let handler = self.handler(stage)?;
            let result = handler
                .auto_execute(StageContext {
                    session: &session,
                    content: &mut content,
                    history: &[],
                    prompt_override: None,
                })
                .await;

            match result {
                Ok(_) => {
                    self.library.save(&content)?;
                    if !session.stage_data.contains(stage) {
                        let snapshot = handler.snapshot(&session, &content);
                        session.stage_data.record(snapshot)?;
                    }
                    info!(%stage, "stage done");
                }
                Err(e) if matches!(stage, Stage::Optimize | Stage::Image) => {
                    warn!(%stage, error = %e, "optional stage failed, continuing");
                    // Handlers only touch the draft in memory; drop the partial edit.
                    content = self.library.require(&session.content_id)?;
                }
                Err(e) => {
                    warn!(%stage, error = %e, "automatic run failed");
                    session.error_message = Some(e.to_string());
                    self.sessions.save(&mut session)?;
                    return Ok(AutoRunOutcome::Failed {
                        stage,
                        error: e.to_string(),
                    });
                }
            }
            session.progress = stage.progress();
            self.sessions.save(&mut session)?;
        }

        if settings.enable_auto_publish {
            session.progress = PUBLISH_PROGRESS;
            self.sessions.save(&mut session)?;
            self.auto_publish(&content).await;
        }

        session.current_stage = Stage::Completed;
        session.progress = Stage::Completed.progress();
        self.sessions.save(&mut session)?;
        info!(content_id = %content.id, "automatic run completed");
        Ok(AutoRunOutcome::Completed {
            content_id: content.id,
        })
    }

    /// Failures are logged only; the draft stays available for a later
    /// publish job.
    async fn auto_publish(&self, content: &ContentItem) {
        let account = match self.library.first_active_account() {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(content_id = %content.id, "auto-publish skipped: no active account");
                return;
            }
            Err(e) => {
                warn!(error = %e, "auto-publish skipped: account lookup failed");
                return;
            }
        };
        match publish_item(&self.library, self.publisher.as_ref(), content, &account).await {
            Ok(Some(receipt)) if receipt.success => info!(url = ?receipt.url, "auto-publish succeeded"),
            Ok(None) => info!(content_id = %content.id, "auto-publish skipped: already claimed"),
            Ok(Some(receipt)) => warn!(message = %receipt.message, "auto-publish rejected"),
            Err(e) => warn!(error = %e, "auto-publish failed"),
        }
    }

    /// Read-only; repeated calls without intervening writes return equal values.
    pub fn get_status(&self, session_id: &str) -> Result<SessionStatus> {
        let session = self.sessions.require(session_id)?;
        let state = if session.error_message.is_some() {
            SessionState::Failed
        } else if session.current_stage == Stage::Completed {
            SessionState::Completed
        } else {
            SessionState::Processing
        };
        let summary = match state {
            SessionState::Completed => self.library.get(&session.content_id)?.map(|c| ContentSummary {
                preview: c.preview(SUMMARY_CHARS),
                title: c.title,
            }),
            _ => None,
        };
        Ok(SessionStatus {
            session_id: session.id,
            state,
            stage: session.current_stage,
            progress: session.progress,
            error: session.error_message,
            summary,
        })
    }

    pub fn get_detail(&self, session_id: &str) -> Result<SessionDetail> {
        let session = self.sessions.require(session_id)?;
        let content = self.library.require(&session.content_id)?;
        let messages = self.conversations.all(&session.id, SESSION_LIMIT)?;
        Ok(SessionDetail {
            session,
            content,
            messages,
        })
    }

    /// Conversation of one stage, or of the whole session.
    pub fn get_messages(&self, session_id: &str, stage: Option<Stage>) -> Result<Vec<ConversationMessage>> {
        let session = self.sessions.require(session_id)?;
        match stage {
            Some(stage) => self.conversations.history(&session.id, stage, SESSION_LIMIT),
            None => self.conversations.all(&session.id, SESSION_LIMIT),
        }
    }

    /// Current draft preview for a session.
    pub fn preview(&self, session_id: &str) -> Result<ContentPreview> {
        let session = self.sessions.require(session_id)?;
        Ok(ContentPreview::of(&self.library.require(&session.content_id)?))
    }
}

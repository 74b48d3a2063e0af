use std::sync::Arc;

use async_trait::async_trait;
use copydesk_library::{Account, ContentItem, ContentStatus, LibraryStore, SortOrder};
use copydesk_providers::Publisher;
use copydesk_workflow::{
    publish_claimed, publish_item, AutoRunOutcome, WorkflowMode, WorkflowOrchestrator,
};
use rand::seq::SliceRandom;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SchedulerError};
use crate::store::TaskStore;
use crate::types::{
    ExecutionLog, ExecutionReport, FireOrigin, JobKind, LogStatus, PublishOrder, ScheduledTask,
    TopicMode,
};

/// What the scheduler calls when a trigger fires.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task_id: &str, origin: FireOrigin) -> Result<ExecutionReport>;
}

/// Turns one firing of a scheduled task into content runs and publish calls.
#[derive(Clone)]
pub struct TaskExecutor {
    tasks: TaskStore,
    library: LibraryStore,
    orchestrator: WorkflowOrchestrator,
    publisher: Arc<dyn Publisher>,
}

/// What the job body got done, kept even when it stops with an error.
#[derive(Default)]
struct RunTally {
    content_id: Option<String>,
    published: usize,
    total: usize,
}

impl TaskExecutor {
    pub fn new(
        tasks: TaskStore,
        library: LibraryStore,
        orchestrator: WorkflowOrchestrator,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            tasks,
            library,
            orchestrator,
            publisher,
        }
    }

    /// Topic for the next run. Under `List` the persisted cursor moves on by
    /// one, wrapping at the end of the list.
    pub fn resolve_topic(&self, task: &ScheduledTask) -> Result<Option<String>> {
        match task.topic_mode {
            TopicMode::Random => Ok(None),
            TopicMode::Fixed => Ok(task.topics.first().cloned()),
            TopicMode::List => {
                if task.topics.is_empty() {
                    return Ok(None);
                }
                let len = task.topics.len();
                let index = task.current_topic_index % len;
                self.tasks.advance_topic_cursor(&task.id, (index + 1) % len)?;
                Ok(Some(task.topics[index].clone()))
            }
        }
    }

    /// Drafts this task would publish, in publish order.
    pub fn select_candidates(&self, task: &ScheduledTask) -> Result<Vec<ContentItem>> {
        let limit = task.publish_limit();
        let items = match task.publish_order {
            PublishOrder::Oldest => {
                self.library
                    .publish_candidates(task.content_kind, SortOrder::OldestFirst, limit)?
            }
            PublishOrder::Newest => {
                self.library
                    .publish_candidates(task.content_kind, SortOrder::NewestFirst, limit)?
            }
            PublishOrder::Random => {
                let mut all =
                    self.library
                        .publish_candidates(task.content_kind, SortOrder::OldestFirst, None)?;
                all.shuffle(&mut rand::thread_rng());
                if let Some(limit) = limit {
                    all.truncate(limit);
                }
                all
            }
        };
        Ok(items)
    }

    fn target_account(&self, task: &ScheduledTask) -> Result<Account> {
        let missing = || SchedulerError::MissingAccount {
            task_id: task.id.clone(),
        };
        let account_id = task.account_id.as_deref().ok_or_else(missing)?;
        let account = self.library.get_account(account_id)?.ok_or_else(missing)?;
        if !account.is_usable() {
            return Err(SchedulerError::AccountUnavailable {
                account_id: account.id,
                status: account.status,
            });
        }
        Ok(account)
    }

    /// Run one firing of `task_id`.
    ///
    /// Only an unknown task or a failure to record the run is an `Err`; job
    /// failures come back in the report and in the task's `last_error`.
    #[instrument(skip(self), fields(task_id = %task_id, ?origin))]
    pub async fn execute(&self, task_id: &str, origin: FireOrigin) -> Result<ExecutionReport> {
        let task = self.tasks.require(task_id)?;
        let mut logs = Vec::new();
        let mut tally = RunTally::default();

        let outcome = match task.kind {
            JobKind::Generate => self.run_generate(&task, &mut tally, &mut logs).await,
            JobKind::Publish => self.run_publish(&task, &mut tally, &mut logs).await,
            JobKind::GenerateAndPublish => {
                self.run_generate_and_publish(&task, &mut tally, &mut logs).await
            }
        };

        let error = match outcome {
            Ok(()) => (tally.published < tally.total)
                .then(|| format!("published {} of {}", tally.published, tally.total)),
            Err(e) => Some(e.to_string()),
        };
        for log in logs.iter_mut().filter(|l| l.status == LogStatus::Running) {
            log.status = LogStatus::Failed;
            log.error = error.clone();
        }
        self.tasks.finish_run(&task.id, &logs, error.as_deref())?;

        match &error {
            None => info!(kind = %task.kind, "task run succeeded"),
            Some(e) => warn!(kind = %task.kind, error = %e, "task run failed"),
        }
        Ok(ExecutionReport {
            task_id: task.id,
            kind: task.kind,
            success: error.is_none(),
            content_id: tally.content_id,
            published_count: tally.published,
            total_count: tally.total,
            error,
        })
    }

    /// Automatic content run; returns the produced content id.
    async fn generate_content(&self, task: &ScheduledTask, log: &mut ExecutionLog) -> Result<String> {
        let topic = self.resolve_topic(task)?;
        let session =
            self.orchestrator
                .create_session(WorkflowMode::Auto, task.content_kind, topic.as_deref())?;
        log.content_id = Some(session.content_id.clone());

        match self.orchestrator.run_automatic(&session.id).await? {
            AutoRunOutcome::Completed { content_id } => Ok(content_id),
            AutoRunOutcome::Failed { stage, error } => Err(SchedulerError::RunFailed { stage, error }),
        }
    }

    async fn run_generate(
        &self,
        task: &ScheduledTask,
        tally: &mut RunTally,
        logs: &mut Vec<ExecutionLog>,
    ) -> Result<()> {
        let mut log = self.tasks.start_log(JobKind::Generate, Some(&task.id), None, None)?;
        let result = self.generate_content(task, &mut log).await;
        if let Ok(content_id) = &result {
            log.status = LogStatus::Completed;
            tally.content_id = Some(content_id.clone());
        }
        logs.push(log);
        result.map(|_| ())
    }

    async fn run_publish(
        &self,
        task: &ScheduledTask,
        tally: &mut RunTally,
        logs: &mut Vec<ExecutionLog>,
    ) -> Result<()> {
        let account = self.target_account(task)?;
        let candidates = self.select_candidates(task)?;
        if candidates.is_empty() {
            info!(task_id = %task.id, "no drafts to publish");
            return Ok(());
        }

        for item in &candidates {
            // Another firing may have taken it since the candidates were read.
            if !self.library.claim_for_publishing(&item.id)? {
                debug!(content_id = %item.id, "candidate claimed by another run");
                continue;
            }
            tally.total += 1;
            let mut log = self.tasks.start_log(
                JobKind::Publish,
                Some(&task.id),
                Some(&item.id),
                Some(&account.id),
            )?;
            match publish_claimed(&self.library, self.publisher.as_ref(), item, &account).await {
                Ok(receipt) if receipt.success => {
                    tally.published += 1;
                    log.status = LogStatus::Completed;
                }
                Ok(receipt) => {
                    log.status = LogStatus::Failed;
                    log.error = Some(receipt.message);
                }
                Err(e) => {
                    log.status = LogStatus::Failed;
                    log.error = Some(e.to_string());
                }
            }
            logs.push(log);
        }
        Ok(())
    }

    async fn run_generate_and_publish(
        &self,
        task: &ScheduledTask,
        tally: &mut RunTally,
        logs: &mut Vec<ExecutionLog>,
    ) -> Result<()> {
        // Checked first so a bad account does not cost a content run.
        let account = self.target_account(task)?;
        let mut log = self.tasks.start_log(
            JobKind::GenerateAndPublish,
            Some(&task.id),
            None,
            Some(&account.id),
        )?;
        let result = self.generate_then_publish(task, &account, tally, &mut log).await;
        logs.push(log);
        result
    }

    /// One log record covers both halves.
    async fn generate_then_publish(
        &self,
        task: &ScheduledTask,
        account: &Account,
        tally: &mut RunTally,
        log: &mut ExecutionLog,
    ) -> Result<()> {
        let content_id = self.generate_content(task, log).await?;
        tally.content_id = Some(content_id.clone());
        tally.total = 1;
        let item = self.library.require(&content_id)?;

        // Pipeline auto-publish may already have handled it.
        match item.status {
            ContentStatus::Published => {
                tally.published = 1;
                log.status = LogStatus::Completed;
                return Ok(());
            }
            ContentStatus::Failed => {
                log.status = LogStatus::Failed;
                log.error = item.error_message.clone();
                return Ok(());
            }
            ContentStatus::Draft | ContentStatus::Publishing => {}
        }

        match publish_item(&self.library, self.publisher.as_ref(), &item, account).await? {
            Some(receipt) if receipt.success => {
                tally.published = 1;
                log.status = LogStatus::Completed;
            }
            Some(receipt) => {
                log.status = LogStatus::Failed;
                log.error = Some(receipt.message);
            }
            None => {
                debug!(content_id = %item.id, "fresh content claimed by another run");
                tally.total = 0;
                log.status = LogStatus::Completed;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRunner for TaskExecutor {
    async fn run(&self, task_id: &str, origin: FireOrigin) -> Result<ExecutionReport> {
        self.execute(task_id, origin).await
    }
}

use chrono::{DateTime, SecondsFormat, Utc};
use copydesk_core::types::{new_id, now_rfc3339};
use copydesk_library::{lock, SharedConnection};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use crate::db::{row_to_log, row_to_task, LOG_COLUMNS, TASK_COLUMNS};
use crate::error::{Result, SchedulerError};
use crate::types::{ExecutionLog, JobKind, LogStatus, NewScheduledTask, ScheduledTask};

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Scheduled task definitions and their execution log.
#[derive(Clone)]
pub struct TaskStore {
    db: SharedConnection,
}

impl TaskStore {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    /// Validate and insert a new task. `next_run_at` starts empty; the
    /// scheduler fills it on `upsert`.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn create(&self, new: &NewScheduledTask) -> Result<ScheduledTask> {
        new.validate()?;
        let now = now_rfc3339();
        let task = ScheduledTask {
            id: new_id(),
            name: new.name.trim().to_string(),
            kind: new.kind,
            content_kind: new.content_kind,
            schedule: new.schedule.clone(),
            active_hours: new.active_hours,
            topic_mode: new.topic_mode,
            topics: new.topics.clone(),
            current_topic_index: 0,
            publish_mode: new.publish_mode,
            publish_batch_size: new.publish_batch_size,
            publish_order: new.publish_order,
            account_id: new.account_id.clone(),
            is_active: new.is_active,
            last_run_at: None,
            next_run_at: None,
            run_count: 0,
            last_error: None,
            created_at: now.clone(),
            updated_at: now,
        };
        let conn = lock(&self.db);
        conn.execute(
            &format!(
                "INSERT INTO scheduled_tasks ({TASK_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)"
            ),
            params![
                task.id,
                task.name,
                task.kind.as_str(),
                task.content_kind.as_str(),
                serde_json::to_string(&task.schedule)?,
                task.active_hours.start_hour,
                task.active_hours.end_hour,
                task.topic_mode.as_str(),
                serde_json::to_string(&task.topics)?,
                task.current_topic_index as i64,
                task.publish_mode.as_str(),
                task.publish_batch_size as i64,
                task.publish_order.as_str(),
                task.account_id,
                task.is_active,
                task.last_run_at,
                task.next_run_at,
                task.run_count,
                task.last_error,
                task.created_at,
                task.updated_at,
            ],
        )?;
        info!(task_id = %task.id, kind = %task.kind, "scheduled task created");
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let conn = lock(&self.db);
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    pub fn require(&self, id: &str) -> Result<ScheduledTask> {
        self.get(id)?
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Result<Vec<ScheduledTask>> {
        self.query("SELECT {cols} FROM scheduled_tasks ORDER BY created_at, rowid")
    }

    pub fn list_active(&self) -> Result<Vec<ScheduledTask>> {
        self.query("SELECT {cols} FROM scheduled_tasks WHERE is_active = 1 ORDER BY created_at, rowid")
    }

    fn query(&self, sql: &str) -> Result<Vec<ScheduledTask>> {
        let conn = lock(&self.db);
        let mut stmt = conn.prepare(&sql.replace("{cols}", TASK_COLUMNS))?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_active(&self) -> Result<usize> {
        let conn = lock(&self.db);
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_tasks WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    /// Replace the editable fields of a task. Run history and the topic
    /// cursor are kept; callers re-arm the task afterwards.
    #[instrument(skip(self, new))]
    pub fn update(&self, id: &str, new: &NewScheduledTask) -> Result<ScheduledTask> {
        new.validate()?;
        {
            let conn = lock(&self.db);
            let changed = conn.execute(
                "UPDATE scheduled_tasks SET name = ?2, kind = ?3, content_kind = ?4, schedule = ?5,
                    active_start_hour = ?6, active_end_hour = ?7, topic_mode = ?8, topics = ?9,
                    publish_mode = ?10, publish_batch_size = ?11, publish_order = ?12,
                    account_id = ?13, is_active = ?14, updated_at = ?15
                 WHERE id = ?1",
                params![
                    id,
                    new.name.trim(),
                    new.kind.as_str(),
                    new.content_kind.as_str(),
                    serde_json::to_string(&new.schedule)?,
                    new.active_hours.start_hour,
                    new.active_hours.end_hour,
                    new.topic_mode.as_str(),
                    serde_json::to_string(&new.topics)?,
                    new.publish_mode.as_str(),
                    new.publish_batch_size as i64,
                    new.publish_order.as_str(),
                    new.account_id,
                    new.is_active,
                    now_rfc3339(),
                ],
            )?;
            if changed == 0 {
                return Err(SchedulerError::TaskNotFound { id: id.to_string() });
            }
        }
        self.require(id)
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = lock(&self.db);
        let changed = conn.execute(
            "UPDATE scheduled_tasks SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, active, now_rfc3339()],
        )?;
        if changed == 0 {
            return Err(SchedulerError::TaskNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = lock(&self.db);
        let n = conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(SchedulerError::TaskNotFound { id: id.to_string() });
        }
        info!(task_id = %id, "scheduled task deleted");
        Ok(())
    }

    pub fn set_next_run(&self, id: &str, at: Option<&DateTime<Utc>>) -> Result<()> {
        let conn = lock(&self.db);
        conn.execute(
            "UPDATE scheduled_tasks SET next_run_at = ?2 WHERE id = ?1",
            params![id, at.map(timestamp)],
        )?;
        Ok(())
    }

    pub fn advance_topic_cursor(&self, id: &str, next_index: usize) -> Result<()> {
        let conn = lock(&self.db);
        conn.execute(
            "UPDATE scheduled_tasks SET current_topic_index = ?2 WHERE id = ?1",
            params![id, next_index as i64],
        )?;
        debug!(task_id = %id, next_index, "topic cursor advanced");
        Ok(())
    }

    /// Open a log record in `Running` state.
    pub fn start_log(
        &self,
        kind: JobKind,
        task_id: Option<&str>,
        content_id: Option<&str>,
        account_id: Option<&str>,
    ) -> Result<ExecutionLog> {
        let now = now_rfc3339();
        let log = ExecutionLog {
            id: new_id(),
            kind,
            status: LogStatus::Running,
            content_id: content_id.map(str::to_string),
            scheduled_task_id: task_id.map(str::to_string),
            account_id: account_id.map(str::to_string),
            error: None,
            started_at: Some(now.clone()),
            finished_at: None,
            created_at: now,
        };
        let conn = lock(&self.db);
        conn.execute(
            &format!("INSERT INTO execution_logs ({LOG_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)"),
            params![
                log.id,
                log.kind.as_str(),
                log.status.as_str(),
                log.content_id,
                log.scheduled_task_id,
                log.account_id,
                log.error,
                log.started_at,
                log.finished_at,
                log.created_at,
            ],
        )?;
        Ok(log)
    }

    /// Close a run: write the final state of its log records and the task's
    /// run bookkeeping in one transaction.
    ///
    /// A task deleted while the run was in flight has no bookkeeping left to
    /// update; its log records are still closed.
    #[instrument(skip(self, logs, error), fields(logs = logs.len()))]
    pub fn finish_run(&self, task_id: &str, logs: &[ExecutionLog], error: Option<&str>) -> Result<()> {
        let now = now_rfc3339();
        let mut conn = lock(&self.db);
        let tx = conn.transaction()?;
        for log in logs {
            tx.execute(
                "UPDATE execution_logs
                 SET status = ?2, content_id = ?3, account_id = ?4, error = ?5, finished_at = ?6
                 WHERE id = ?1",
                params![
                    log.id,
                    log.status.as_str(),
                    log.content_id,
                    log.account_id,
                    log.error,
                    now,
                ],
            )?;
        }
        let changed = tx.execute(
            "UPDATE scheduled_tasks
             SET last_run_at = ?2, run_count = run_count + 1, last_error = ?3, updated_at = ?2
             WHERE id = ?1",
            params![task_id, now, error],
        )?;
        tx.commit()?;
        if changed == 0 {
            warn!(task_id, "task deleted during its run, only the logs were closed");
        }
        Ok(())
    }

    pub fn logs_for_task(&self, task_id: &str) -> Result<Vec<ExecutionLog>> {
        let conn = lock(&self.db);
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM execution_logs
             WHERE scheduled_task_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![task_id], row_to_log)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use copydesk_core::ContentKind;
    use rusqlite::Connection;

    use super::*;
    use crate::types::{ScheduleSpec, TopicMode};

    fn store() -> TaskStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        TaskStore::new(Arc::new(Mutex::new(conn)))
    }

    fn hourly() -> NewScheduledTask {
        NewScheduledTask::new(
            "hourly",
            JobKind::Generate,
            ContentKind::Microblog,
            ScheduleSpec::FixedInterval { minutes: 60 },
        )
    }

    #[test]
    fn create_and_reload() {
        let store = store();
        let mut new = hourly();
        new.topic_mode = TopicMode::List;
        new.topics = vec!["a".into(), "b".into()];
        let task = store.create(&new).unwrap();
        assert_eq!(store.require(&task.id).unwrap(), task);
        assert_eq!(store.count_active().unwrap(), 1);
    }

    #[test]
    fn invalid_definitions_are_not_stored() {
        let store = store();
        let mut new = hourly();
        new.schedule = ScheduleSpec::Cron {
            expression: "not a cron".into(),
        };
        assert!(store.create(&new).is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn update_keeps_run_history() {
        let store = store();
        let task = store.create(&hourly()).unwrap();
        store.finish_run(&task.id, &[], None).unwrap();

        let mut edit = hourly();
        edit.name = "renamed".into();
        edit.is_active = false;
        let updated = store.update(&task.id, &edit).unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.run_count, 1);
        assert!(store.list_active().unwrap().is_empty());
        assert!(matches!(
            store.update("missing", &edit),
            Err(SchedulerError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn finish_run_closes_logs_and_counts() {
        let store = store();
        let task = store.create(&hourly()).unwrap();
        let mut log = store
            .start_log(JobKind::Generate, Some(&task.id), None, None)
            .unwrap();
        log.status = LogStatus::Failed;
        log.error = Some("generator down".into());

        store.finish_run(&task.id, &[log], Some("generator down")).unwrap();

        let task = store.require(&task.id).unwrap();
        assert_eq!(task.run_count, 1);
        assert_eq!(task.last_error.as_deref(), Some("generator down"));
        assert!(task.last_run_at.is_some());
        let logs = store.logs_for_task(&task.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert!(logs[0].finished_at.is_some());

        store.finish_run(&task.id, &[], None).unwrap();
        assert_eq!(store.require(&task.id).unwrap().last_error, None);
    }

    #[test]
    fn logs_close_even_if_the_task_is_gone() {
        let store = store();
        let task = store.create(&hourly()).unwrap();
        let mut log = store
            .start_log(JobKind::Generate, Some(&task.id), None, None)
            .unwrap();
        store.delete(&task.id).unwrap();

        log.status = LogStatus::Completed;
        store.finish_run(&task.id, &[log], None).unwrap();

        let logs = store.logs_for_task(&task.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Completed);
        assert!(logs[0].finished_at.is_some());
        assert!(store.get(&task.id).unwrap().is_none());
    }

    #[test]
    fn next_run_round_trips() {
        let store = store();
        let task = store.create(&hourly()).unwrap();
        let at = Utc::now();
        store.set_next_run(&task.id, Some(&at)).unwrap();
        let stored = store.require(&task.id).unwrap().next_run_at.unwrap();
        assert_eq!(DateTime::parse_from_rfc3339(&stored).unwrap().timestamp(), at.timestamp());
        store.set_next_run(&task.id, None).unwrap();
        assert!(store.require(&task.id).unwrap().next_run_at.is_none());
    }
}

use copydesk_library::{json_column, text_column};
use rusqlite::Connection;

use crate::error::Result;
use crate::types::{
    ActiveHours, ExecutionLog, JobKind, LogStatus, PublishMode, PublishOrder, ScheduleSpec,
    ScheduledTask, TopicMode,
};

pub(crate) const TASK_COLUMNS: &str = "id, name, kind, content_kind, schedule,
    active_start_hour, active_end_hour, topic_mode, topics, current_topic_index,
    publish_mode, publish_batch_size, publish_order, account_id, is_active,
    last_run_at, next_run_at, run_count, last_error, created_at, updated_at";

pub(crate) const LOG_COLUMNS: &str = "id, kind, status, content_id, scheduled_task_id,
    account_id, error, started_at, finished_at, created_at";

pub(crate) fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let schedule: ScheduleSpec = json_column(row, 4)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: text_column::<JobKind>(row, 2)?,
        content_kind: text_column(row, 3)?,
        schedule,
        active_hours: ActiveHours {
            start_hour: row.get(5)?,
            end_hour: row.get(6)?,
        },
        topic_mode: text_column::<TopicMode>(row, 7)?,
        topics: json_column(row, 8)?,
        current_topic_index: row.get::<_, i64>(9)? as usize,
        publish_mode: text_column::<PublishMode>(row, 10)?,
        publish_batch_size: row.get::<_, i64>(11)? as usize,
        publish_order: text_column::<PublishOrder>(row, 12)?,
        account_id: row.get(13)?,
        is_active: row.get(14)?,
        last_run_at: row.get(15)?,
        next_run_at: row.get(16)?,
        run_count: row.get(17)?,
        last_error: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

pub(crate) fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionLog> {
    Ok(ExecutionLog {
        id: row.get(0)?,
        kind: text_column::<JobKind>(row, 1)?,
        status: text_column::<LogStatus>(row, 2)?,
        content_id: row.get(3)?,
        scheduled_task_id: row.get(4)?,
        account_id: row.get(5)?,
        error: row.get(6)?,
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Initialise the scheduler schema in `conn`. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id                   TEXT    NOT NULL PRIMARY KEY,
            name                 TEXT    NOT NULL,
            kind                 TEXT    NOT NULL,
            content_kind         TEXT    NOT NULL,
            schedule             TEXT    NOT NULL,   -- JSON-encoded ScheduleSpec
            active_start_hour    INTEGER NOT NULL DEFAULT 0,
            active_end_hour      INTEGER NOT NULL DEFAULT 24,
            topic_mode           TEXT    NOT NULL DEFAULT 'random',
            topics               TEXT    NOT NULL DEFAULT '[]',
            current_topic_index  INTEGER NOT NULL DEFAULT 0,
            publish_mode         TEXT    NOT NULL DEFAULT 'one',
            publish_batch_size   INTEGER NOT NULL DEFAULT 1,
            publish_order        TEXT    NOT NULL DEFAULT 'oldest',
            account_id           TEXT,
            is_active            INTEGER NOT NULL DEFAULT 1,
            last_run_at          TEXT,
            next_run_at          TEXT,
            run_count            INTEGER NOT NULL DEFAULT 0,
            last_error           TEXT,
            created_at           TEXT    NOT NULL,
            updated_at           TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_active ON scheduled_tasks (is_active);

        CREATE TABLE IF NOT EXISTS execution_logs (
            id                 TEXT NOT NULL PRIMARY KEY,
            kind               TEXT NOT NULL,
            status             TEXT NOT NULL,
            content_id         TEXT,
            scheduled_task_id  TEXT,
            account_id         TEXT,
            error              TEXT,
            started_at         TEXT,
            finished_at        TEXT,
            created_at         TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_execution_logs_task
            ON execution_logs (scheduled_task_id, created_at);
        ",
    )?;
    Ok(())
}

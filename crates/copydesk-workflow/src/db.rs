use rusqlite::Connection;

use crate::error::Result;

/// Initialise workflow sessions, the stage conversation log and pipeline
/// settings. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS workflow_sessions (
            id             TEXT PRIMARY KEY,
            content_id     TEXT NOT NULL,
            mode           TEXT NOT NULL,
            content_kind   TEXT NOT NULL,
            topic_hint     TEXT,
            current_stage  TEXT NOT NULL DEFAULT 'generate',
            stage_data     TEXT NOT NULL DEFAULT '{}',
            progress       INTEGER NOT NULL DEFAULT 0,
            error_message  TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_workflow_content
            ON workflow_sessions(content_id);

        CREATE TABLE IF NOT EXISTS conversation_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  TEXT NOT NULL,
            stage       TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conv_session_stage
            ON conversation_messages(session_id, stage, created_at, id);

        CREATE TABLE IF NOT EXISTS pipeline_settings (
            content_kind         TEXT PRIMARY KEY,
            enable_optimize      INTEGER NOT NULL DEFAULT 1,
            enable_image         INTEGER NOT NULL DEFAULT 1,
            enable_auto_publish  INTEGER NOT NULL DEFAULT 0,
            updated_at           TEXT NOT NULL
        );",
    )?;
    Ok(())
}

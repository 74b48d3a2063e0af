use copydesk_core::types::{new_id, now_rfc3339};
use copydesk_core::ContentKind;
use copydesk_library::{json_column, lock, text_column, SharedConnection};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::{Result, WorkflowError};
use crate::types::{Stage, StageData, WorkflowMode, WorkflowSession};

const SESSION_COLUMNS: &str = "id, content_id, mode, content_kind, topic_hint, current_stage,
    stage_data, progress, error_message, created_at, updated_at";

/// Persistence for workflow sessions.
#[derive(Clone)]
pub struct SessionStore {
    db: SharedConnection,
}

impl SessionStore {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    /// Persist a new session positioned at the first stage.
    #[instrument(skip(self), fields(content_id))]
    pub fn create(
        &self,
        content_id: &str,
        mode: WorkflowMode,
        content_kind: ContentKind,
        topic_hint: Option<&str>,
    ) -> Result<WorkflowSession> {
        let now = now_rfc3339();
        let session = WorkflowSession {
            id: new_id(),
            content_id: content_id.to_string(),
            mode,
            content_kind,
            topic_hint: topic_hint.map(str::to_string),
            current_stage: Stage::Generate,
            stage_data: StageData::default(),
            progress: 0,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        };
        let db = lock(&self.db);
        db.execute(
            &format!("INSERT INTO workflow_sessions ({SESSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
            params![
                session.id,
                session.content_id,
                session.mode.to_string(),
                session.content_kind.as_str(),
                session.topic_hint,
                session.current_stage.as_str(),
                serde_json::to_string(&session.stage_data)?,
                session.progress,
                session.error_message,
                session.created_at,
                session.updated_at,
            ],
        )?;
        debug!(session_id = %session.id, "workflow session created");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Result<Option<WorkflowSession>> {
        let db = lock(&self.db);
        let session = db
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM workflow_sessions WHERE id = ?1"),
                params![id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    pub fn require(&self, id: &str) -> Result<WorkflowSession> {
        self.get(id)?
            .ok_or_else(|| WorkflowError::SessionNotFound(id.to_string()))
    }

    /// Write back the mutable state (stage, snapshots, progress, error).
    /// Bumps `updated_at` on the passed value as well as in storage.
    #[instrument(skip(self, session), fields(session_id = %session.id, stage = %session.current_stage))]
    pub fn save(&self, session: &mut WorkflowSession) -> Result<()> {
        session.updated_at = now_rfc3339();
        let db = lock(&self.db);
        let changed = db.execute(
            "UPDATE workflow_sessions
             SET current_stage = ?2, stage_data = ?3, progress = ?4,
                 error_message = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                session.id,
                session.current_stage.as_str(),
                serde_json::to_string(&session.stage_data)?,
                session.progress,
                session.error_message,
                session.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(WorkflowError::SessionNotFound(session.id.clone()));
        }
        Ok(())
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowSession> {
    // A row that does not decode must not load: saving a defaulted value
    // back would drop snapshots or rewind the stage.
    Ok(WorkflowSession {
        id: row.get(0)?,
        content_id: row.get(1)?,
        mode: text_column::<WorkflowMode>(row, 2)?,
        content_kind: text_column(row, 3)?,
        topic_hint: row.get(4)?,
        current_stage: text_column::<Stage>(row, 5)?,
        stage_data: json_column::<StageData>(row, 6)?,
        progress: row.get::<_, i64>(7)?.clamp(0, 100) as u8,
        error_message: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;

    use super::*;
    use crate::types::StageSnapshot;

    fn store() -> SessionStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SessionStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn stage_data_survives_round_trip() {
        let store = store();
        let mut session = store
            .create("content-1", WorkflowMode::Manual, ContentKind::Article, Some("tea"))
            .unwrap();
        session
            .stage_data
            .record(StageSnapshot::Image {
                image_prompts: vec!["p".into()],
                images: vec![],
                completed_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        session.current_stage = Stage::Edit;
        session.progress = Stage::Edit.progress();
        store.save(&mut session).unwrap();

        let loaded = store.require(&session.id).unwrap();
        assert_eq!(loaded.current_stage, Stage::Edit);
        assert_eq!(loaded.progress, 90);
        assert_eq!(loaded.topic_hint.as_deref(), Some("tea"));
        assert!(loaded.stage_data.contains(Stage::Image));
    }

    #[test]
    fn undecodable_row_fails_instead_of_defaulting() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let store = SessionStore::new(db.clone());
        let mut session = store
            .create("content-1", WorkflowMode::Auto, ContentKind::Article, None)
            .unwrap();
        session
            .stage_data
            .record(StageSnapshot::Image {
                image_prompts: vec!["p".into()],
                images: vec![],
                completed_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        session.current_stage = Stage::Edit;
        store.save(&mut session).unwrap();

        let read_raw = || -> (String, String) {
            lock(&db)
                .query_row(
                    "SELECT stage_data, current_stage FROM workflow_sessions WHERE id = ?1",
                    params![session.id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .unwrap()
        };
        let (good, _) = read_raw();
        let mut broken: serde_json::Value = serde_json::from_str(&good).unwrap();
        broken["optimize"] = serde_json::json!({ "unexpected": true });
        lock(&db)
            .execute(
                "UPDATE workflow_sessions SET stage_data = ?2 WHERE id = ?1",
                params![session.id, broken.to_string()],
            )
            .unwrap();
        assert!(matches!(store.require(&session.id), Err(WorkflowError::Database(_))));
        assert_eq!(read_raw().0, broken.to_string());

        lock(&db)
            .execute(
                "UPDATE workflow_sessions SET stage_data = ?2, current_stage = 'review' WHERE id = ?1",
                params![session.id, good],
            )
            .unwrap();
        assert!(store.get(&session.id).is_err());
        assert_eq!(read_raw().1, "review");
    }

    #[test]
    fn unknown_session_is_not_found() {
        assert!(matches!(
            store().require("missing"),
            Err(WorkflowError::SessionNotFound(_))
        ));
    }
}

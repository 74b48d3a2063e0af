use copydesk_core::types::now_rfc3339;
use copydesk_core::Role;
use copydesk_library::{json_column, lock, text_column, SharedConnection};
use copydesk_providers::ChatTurn;
use rusqlite::params;

use crate::error::Result;
use crate::types::{ConversationMessage, Stage};

/// Default number of stage messages handed to a handler.
pub const HISTORY_LIMIT: usize = 50;
/// Default number of messages returned for a whole session.
pub const SESSION_LIMIT: usize = 100;

/// Append-only log of every stage conversation.
///
/// Messages replay in `(created_at, id)` order; the autoincrement id breaks
/// ties between messages written in the same microsecond.
#[derive(Clone)]
pub struct ConversationLog {
    db: SharedConnection,
}

impl ConversationLog {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    pub fn append(
        &self,
        session_id: &str,
        stage: Stage,
        role: Role,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<ConversationMessage> {
        let created_at = now_rfc3339();
        let db = lock(&self.db);
        db.execute(
            "INSERT INTO conversation_messages
             (session_id, stage, role, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                stage.as_str(),
                role.to_string(),
                content,
                serde_json::to_string(&metadata)?,
                created_at,
            ],
        )?;
        Ok(ConversationMessage {
            id: db.last_insert_rowid(),
            session_id: session_id.to_string(),
            stage,
            role,
            content: content.to_string(),
            metadata,
            created_at,
        })
    }

    /// Oldest-first messages of one stage, at most `limit`.
    pub fn history(&self, session_id: &str, stage: Stage, limit: usize) -> Result<Vec<ConversationMessage>> {
        let db = lock(&self.db);
        let mut stmt = db.prepare(
            "SELECT id, session_id, stage, role, content, metadata, created_at
             FROM conversation_messages
             WHERE session_id = ?1 AND stage = ?2
             ORDER BY created_at ASC, id ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![session_id, stage.as_str(), limit as i64], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Oldest-first messages across every stage, at most `limit`.
    pub fn all(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationMessage>> {
        let db = lock(&self.db);
        let mut stmt = db.prepare(
            "SELECT id, session_id, stage, role, content, metadata, created_at
             FROM conversation_messages
             WHERE session_id = ?1
             ORDER BY created_at ASC, id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count(&self, session_id: &str, stage: Option<Stage>) -> Result<usize> {
        let db = lock(&self.db);
        let n: i64 = match stage {
            Some(stage) => db.query_row(
                "SELECT COUNT(*) FROM conversation_messages WHERE session_id = ?1 AND stage = ?2",
                params![session_id, stage.as_str()],
                |r| r.get(0),
            )?,
            None => db.query_row(
                "SELECT COUNT(*) FROM conversation_messages WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )?,
        };
        Ok(n as usize)
    }
}

/// User and assistant turns only, as model context.
pub fn chat_turns(history: &[ConversationMessage]) -> Vec<ChatTurn> {
    history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| ChatTurn {
            role: m.role,
            content: m.content.clone(),
        })
        .collect()
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationMessage> {
    Ok(ConversationMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        stage: text_column::<Stage>(row, 2)?,
        role: text_column::<Role>(row, 3)?,
        content: row.get(4)?,
        metadata: json_column(row, 5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;
    use serde_json::json;

    use super::*;

    fn log() -> ConversationLog {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        ConversationLog::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn history_is_per_stage_and_ordered() {
        let log = log();
        log.append("s1", Stage::Generate, Role::User, "one", json!({})).unwrap();
        log.append("s1", Stage::Generate, Role::Assistant, "two", json!({})).unwrap();
        log.append("s1", Stage::Image, Role::Assistant, "three", json!({})).unwrap();
        log.append("s2", Stage::Generate, Role::User, "other", json!({})).unwrap();

        let gen = log.history("s1", Stage::Generate, HISTORY_LIMIT).unwrap();
        let texts: Vec<_> = gen.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, ["one", "two"]);
        assert_eq!(log.all("s1", SESSION_LIMIT).unwrap().len(), 3);
        assert_eq!(log.count("s1", Some(Stage::Image)).unwrap(), 1);
        assert_eq!(log.count("s1", None).unwrap(), 3);
    }

    #[test]
    fn history_respects_limit() {
        let log = log();
        for i in 0..5 {
            log.append("s", Stage::Edit, Role::User, &i.to_string(), json!(null)).unwrap();
        }
        let first_two = log.history("s", Stage::Edit, 2).unwrap();
        assert_eq!(first_two[0].content, "0");
        assert_eq!(first_two.len(), 2);
    }

    #[test]
    fn chat_turns_drop_system_messages() {
        let log = log();
        log.append("s", Stage::Generate, Role::System, "note", json!({})).unwrap();
        log.append("s", Stage::Generate, Role::User, "hi", json!({})).unwrap();
        let turns = chat_turns(&log.history("s", Stage::Generate, 10).unwrap());
        assert_eq!(turns, vec![ChatTurn::user("hi")]);
    }
}

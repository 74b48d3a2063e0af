use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, Result};
use serde::de::DeserializeOwned;

use crate::types::{Account, AccountStatus, ContentItem, ContentStatus};

/// One SQLite connection shared by every store in the process.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Lock the shared connection. A panic in another holder does not leave
/// SQLite in a torn state, so a poisoned lock is simply recovered.
pub fn lock(db: &SharedConnection) -> MutexGuard<'_, Connection> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Column order shared by every content SELECT in this crate.
pub(crate) const CONTENT_COLUMNS: &str = "id, content_kind, title, body, topic, status,
    image_prompts, images, tags, token_usage, publish_url, error_message,
    published_at, created_at, updated_at";

pub(crate) const ACCOUNT_COLUMNS: &str = "id, nickname, platform_uid, credentials, status,
    last_publish_at, created_at, updated_at";

/// Parse a TEXT enum column. An unknown value fails the row rather than
/// falling back to a default that a later write would persist.
pub fn text_column<T: FromStr<Err = String>>(row: &rusqlite::Row<'_>, idx: usize) -> Result<T> {
    let raw: String = row.get(idx)?;
    T::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Decode a JSON TEXT column, failing the row on malformed data.
pub fn json_column<T: DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Map a SELECT row (column order from CONTENT_COLUMNS) to a ContentItem.
pub(crate) fn row_to_content(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItem> {
    Ok(ContentItem {
        id: row.get(0)?,
        content_kind: text_column(row, 1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        topic: row.get(4)?,
        status: text_column::<ContentStatus>(row, 5)?,
        image_prompts: json_column(row, 6)?,
        images: json_column(row, 7)?,
        tags: json_column(row, 8)?,
        token_usage: row.get::<_, i64>(9)? as u64,
        publish_url: row.get(10)?,
        error_message: row.get(11)?,
        published_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

pub(crate) fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let credentials = match row.get::<_, Option<String>>(3)? {
        Some(_) => json_column(row, 3)?,
        None => serde_json::Value::Null,
    };
    Ok(Account {
        id: row.get(0)?,
        nickname: row.get(1)?,
        platform_uid: row.get(2)?,
        credentials,
        status: text_column::<AccountStatus>(row, 4)?,
        last_publish_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Initialise the content library tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_content_table(conn)?;
    create_accounts_table(conn)?;
    Ok(())
}

fn create_content_table(conn: &Connection) -> Result<()> {
    // idx_content_candidates serves the publish-candidate query:
    // WHERE status='draft' AND content_kind=? ORDER BY created_at
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS content_items (
            id             TEXT PRIMARY KEY NOT NULL,
            content_kind   TEXT NOT NULL,
            title          TEXT NOT NULL DEFAULT '',
            body           TEXT NOT NULL DEFAULT '',
            topic          TEXT,
            status         TEXT NOT NULL DEFAULT 'draft',
            image_prompts  TEXT NOT NULL DEFAULT '[]',  -- JSON array
            images         TEXT NOT NULL DEFAULT '[]',  -- JSON array of ImageAsset
            tags           TEXT NOT NULL DEFAULT '[]',  -- JSON array
            token_usage    INTEGER NOT NULL DEFAULT 0,
            publish_url    TEXT,
            error_message  TEXT,
            published_at   TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_content_candidates
            ON content_items (status, content_kind, created_at);",
    )
}

fn create_accounts_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            id              TEXT PRIMARY KEY NOT NULL,
            nickname        TEXT NOT NULL,
            platform_uid    TEXT NOT NULL UNIQUE,
            credentials     TEXT,                     -- JSON cookie jar
            status          TEXT NOT NULL DEFAULT 'active',
            last_publish_at TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );",
    )
}

use copydesk_core::types::{new_id, now_rfc3339};
use copydesk_core::ContentKind;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::db::{lock, row_to_account, row_to_content, SharedConnection, ACCOUNT_COLUMNS, CONTENT_COLUMNS};
use crate::error::{LibraryError, Result};
use crate::types::{Account, AccountStatus, ContentItem, ContentStatus};

/// Ordering of publish candidates by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

/// Content items and publishing accounts.
///
/// Cheap to clone: every clone shares the same connection.
#[derive(Clone)]
pub struct LibraryStore {
    db: SharedConnection,
}

impl LibraryStore {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    /// Allocate an empty draft for a new workflow session.
    #[instrument(skip(self))]
    pub fn create_draft(&self, kind: ContentKind, topic: Option<&str>) -> Result<ContentItem> {
        let item = ContentItem::draft(kind, topic.map(str::to_string));
        self.insert(&item)?;
        debug!(content_id = %item.id, "draft allocated");
        Ok(item)
    }

    /// Insert a fully populated item (used by imports and tests).
    pub fn insert(&self, item: &ContentItem) -> Result<()> {
        let conn = lock(&self.db);
        conn.execute(
            &format!("INSERT INTO content_items ({CONTENT_COLUMNS})
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)"),
            params![
                item.id,
                item.content_kind.as_str(),
                item.title,
                item.body,
                item.topic,
                item.status.to_string(),
                serde_json::to_string(&item.image_prompts)?,
                serde_json::to_string(&item.images)?,
                serde_json::to_string(&item.tags)?,
                item.token_usage as i64,
                item.publish_url,
                item.error_message,
                item.published_at,
                item.created_at,
                item.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<ContentItem>> {
        let conn = lock(&self.db);
        let item = conn
            .query_row(
                &format!("SELECT {CONTENT_COLUMNS} FROM content_items WHERE id = ?1"),
                params![id],
                row_to_content,
            )
            .optional()?;
        Ok(item)
    }

    /// Like `get`, but a missing row is an error.
    pub fn require(&self, id: &str) -> Result<ContentItem> {
        self.get(id)?
            .ok_or_else(|| LibraryError::ContentNotFound(id.to_string()))
    }

    /// Persist the editable fields of a draft. Always bumps updated_at.
    #[instrument(skip(self, item), fields(content_id = %item.id))]
    pub fn save(&self, item: &ContentItem) -> Result<()> {
        let conn = lock(&self.db);
        let changed = conn.execute(
            "UPDATE content_items SET
                title=?2, body=?3, image_prompts=?4, images=?5, tags=?6,
                token_usage=?7, updated_at=?8
             WHERE id=?1",
            params![
                item.id,
                item.title,
                item.body,
                serde_json::to_string(&item.image_prompts)?,
                serde_json::to_string(&item.images)?,
                serde_json::to_string(&item.tags)?,
                item.token_usage as i64,
                now_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(LibraryError::ContentNotFound(item.id.clone()));
        }
        Ok(())
    }

    /// Drafts with a non-empty body, ready to be published.
    ///
    /// Ties on `created_at` fall back to insertion order so "oldest" is stable.
    pub fn publish_candidates(
        &self,
        kind: ContentKind,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ContentItem>> {
        let direction = match order {
            SortOrder::OldestFirst => "ASC",
            SortOrder::NewestFirst => "DESC",
        };
        let conn = lock(&self.db);
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTENT_COLUMNS} FROM content_items
             WHERE status = 'draft' AND content_kind = ?1 AND trim(body) != ''
             ORDER BY created_at {direction}, rowid {direction}
             LIMIT ?2"
        ))?;
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map(params![kind.as_str(), limit], row_to_content)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn list_by_status(&self, status: ContentStatus) -> Result<Vec<ContentItem>> {
        let conn = lock(&self.db);
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTENT_COLUMNS} FROM content_items
             WHERE status = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![status.to_string()], row_to_content)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Move a draft to `Publishing` if it is still a draft.
    ///
    /// Returns `false` when another run already took it; only the run that
    /// gets `true` may hand the item to the publisher.
    #[instrument(skip(self))]
    pub fn claim_for_publishing(&self, id: &str) -> Result<bool> {
        let conn = lock(&self.db);
        let changed = conn.execute(
            "UPDATE content_items SET status='publishing', error_message=NULL, updated_at=?2
             WHERE id=?1 AND status='draft'",
            params![id, now_rfc3339()],
        )?;
        if changed == 1 {
            return Ok(true);
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM content_items WHERE id=?1)",
            params![id],
            |r| r.get(0),
        )?;
        if !exists {
            return Err(LibraryError::ContentNotFound(id.to_string()));
        }
        debug!(content_id = %id, "content already claimed");
        Ok(false)
    }

    #[instrument(skip(self))]
    pub fn mark_published(&self, id: &str, url: Option<&str>) -> Result<()> {
        let now = now_rfc3339();
        let conn = lock(&self.db);
        let changed = conn.execute(
            "UPDATE content_items SET status='published', publish_url=?2,
                published_at=?3, error_message=NULL, updated_at=?3
             WHERE id=?1",
            params![id, url, now],
        )?;
        if changed == 0 {
            return Err(LibraryError::ContentNotFound(id.to_string()));
        }
        info!(content_id = %id, "content published");
        Ok(())
    }

    pub fn mark_failed(&self, id: &str, message: &str) -> Result<()> {
        self.set_status(id, ContentStatus::Failed, Some(message))
    }

    fn set_status(&self, id: &str, status: ContentStatus, error: Option<&str>) -> Result<()> {
        let conn = lock(&self.db);
        let changed = conn.execute(
            "UPDATE content_items SET status=?2, error_message=?3, updated_at=?4 WHERE id=?1",
            params![id, status.to_string(), error, now_rfc3339()],
        )?;
        if changed == 0 {
            return Err(LibraryError::ContentNotFound(id.to_string()));
        }
        Ok(())
    }

    // --- accounts ----------------------------------------------------------

    pub fn add_account(
        &self,
        nickname: &str,
        platform_uid: &str,
        credentials: serde_json::Value,
    ) -> Result<Account> {
        let now = now_rfc3339();
        let account = Account {
            id: new_id(),
            nickname: nickname.to_string(),
            platform_uid: platform_uid.to_string(),
            credentials,
            status: AccountStatus::Active,
            last_publish_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        let conn = lock(&self.db);
        conn.execute(
            &format!("INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)"),
            params![
                account.id,
                account.nickname,
                account.platform_uid,
                serde_json::to_string(&account.credentials)?,
                account.status.to_string(),
                account.last_publish_at,
                account.created_at,
                account.updated_at,
            ],
        )?;
        info!(account_id = %account.id, nickname, "account added");
        Ok(account)
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = lock(&self.db);
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// Oldest active account with stored credentials.
    pub fn first_active_account(&self) -> Result<Option<Account>> {
        let conn = lock(&self.db);
        let account = conn
            .query_row(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts
                     WHERE status = 'active' AND credentials IS NOT NULL AND credentials != 'null'
                     ORDER BY created_at, rowid LIMIT 1"
                ),
                [],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub fn set_account_status(&self, id: &str, status: AccountStatus) -> Result<()> {
        let conn = lock(&self.db);
        let changed = conn.execute(
            "UPDATE accounts SET status=?2, updated_at=?3 WHERE id=?1",
            params![id, status.to_string(), now_rfc3339()],
        )?;
        if changed == 0 {
            return Err(LibraryError::AccountNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn touch_account_published(&self, id: &str) -> Result<()> {
        let now = now_rfc3339();
        let conn = lock(&self.db);
        conn.execute(
            "UPDATE accounts SET last_publish_at=?2, updated_at=?2 WHERE id=?1",
            params![id, now],
        )?;
        Ok(())
    }
}

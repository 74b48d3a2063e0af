use copydesk_core::types::now_rfc3339;
use copydesk_core::ContentKind;
use copydesk_library::{lock, SharedConnection};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Which optional steps an automatic run performs for a content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub content_kind: ContentKind,
    pub enable_optimize: bool,
    pub enable_image: bool,
    pub enable_auto_publish: bool,
}

impl PipelineSettings {
    pub fn defaults(content_kind: ContentKind) -> Self {
        Self {
            content_kind,
            enable_optimize: true,
            enable_image: true,
            enable_auto_publish: false,
        }
    }
}

#[derive(Clone)]
pub struct SettingsStore {
    db: SharedConnection,
}

impl SettingsStore {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    /// Settings for a content kind; defaults when no row was ever stored.
    pub fn get(&self, kind: ContentKind) -> Result<PipelineSettings> {
        let db = lock(&self.db);
        let row = db
            .query_row(
                "SELECT enable_optimize, enable_image, enable_auto_publish
                 FROM pipeline_settings WHERE content_kind = ?1",
                params![kind.as_str()],
                |r| {
                    Ok(PipelineSettings {
                        content_kind: kind,
                        enable_optimize: r.get(0)?,
                        enable_image: r.get(1)?,
                        enable_auto_publish: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_else(|| PipelineSettings::defaults(kind)))
    }

    pub fn put(&self, settings: &PipelineSettings) -> Result<()> {
        let db = lock(&self.db);
        db.execute(
            "INSERT INTO pipeline_settings
             (content_kind, enable_optimize, enable_image, enable_auto_publish, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(content_kind) DO UPDATE SET
                enable_optimize = excluded.enable_optimize,
                enable_image = excluded.enable_image,
                enable_auto_publish = excluded.enable_auto_publish,
                updated_at = excluded.updated_at",
            params![
                settings.content_kind.as_str(),
                settings.enable_optimize,
                settings.enable_image,
                settings.enable_auto_publish,
                now_rfc3339(),
            ],
        )?;
        info!(
            kind = %settings.content_kind,
            optimize = settings.enable_optimize,
            image = settings.enable_image,
            auto_publish = settings.enable_auto_publish,
            "pipeline settings updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;

    use super::*;

    #[test]
    fn missing_row_yields_defaults_and_put_overrides() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let store = SettingsStore::new(Arc::new(Mutex::new(conn)));

        let defaults = store.get(ContentKind::Microblog).unwrap();
        assert!(defaults.enable_optimize && defaults.enable_image);
        assert!(!defaults.enable_auto_publish);

        let mut changed = defaults;
        changed.enable_optimize = false;
        store.put(&changed).unwrap();
        store.put(&changed).unwrap();
        assert_eq!(store.get(ContentKind::Microblog).unwrap(), changed);
        assert_eq!(
            store.get(ContentKind::Article).unwrap(),
            PipelineSettings::defaults(ContentKind::Article)
        );
    }
}

use copydesk_library::{Account, ContentItem, LibraryStore};
use copydesk_providers::{AccountCredentials, PublishReceipt, PublishRequest, Publisher};
use tracing::{info, instrument, warn};

use crate::error::Result;

/// Build the publisher's view of a content item. Microblog posts carry no
/// title.
pub fn publish_request(item: &ContentItem) -> PublishRequest {
    PublishRequest {
        content_id: item.id.clone(),
        content_kind: item.content_kind,
        title: item.content_kind.has_title().then(|| item.title.clone()),
        body: item.body.clone(),
        image_paths: item.image_paths(),
        tags: item.tags.clone(),
    }
}

pub fn credentials(account: &Account) -> AccountCredentials {
    AccountCredentials {
        account_id: account.id.clone(),
        platform_uid: account.platform_uid.clone(),
        cookies: account.credentials.clone(),
    }
}

/// Claim a draft and publish it with one account.
///
/// `Ok(None)` means the item was no longer a draft, usually because another
/// run is publishing it; the publisher is not called.
pub async fn publish_item(
    library: &LibraryStore,
    publisher: &dyn Publisher,
    item: &ContentItem,
    account: &Account,
) -> Result<Option<PublishReceipt>> {
    if !library.claim_for_publishing(&item.id)? {
        info!(content_id = %item.id, "content already claimed, not publishing");
        return Ok(None);
    }
    publish_claimed(library, publisher, item, account).await.map(Some)
}

/// Publish an item this run already claimed and record the result on it.
///
/// A rejected post is `Ok` with `success = false` and leaves the item
/// `Failed`. An unreachable publisher also marks the item `Failed` and is
/// returned as an error.
#[instrument(skip_all, fields(content_id = %item.id, account_id = %account.id))]
pub async fn publish_claimed(
    library: &LibraryStore,
    publisher: &dyn Publisher,
    item: &ContentItem,
    account: &Account,
) -> Result<PublishReceipt> {
    let request = publish_request(item);

    match publisher.publish(&request, &credentials(account)).await {
        Ok(receipt) if receipt.success => {
            library.mark_published(&item.id, receipt.url.as_deref())?;
            library.touch_account_published(&account.id)?;
            info!(url = ?receipt.url, "content published");
            Ok(receipt)
        }
        Ok(receipt) => {
            warn!(message = %receipt.message, "publisher rejected content");
            library.mark_failed(&item.id, &receipt.message)?;
            Ok(receipt)
        }
        Err(e) => {
            warn!(error = %e, "publisher unreachable");
            library.mark_failed(&item.id, &e.to_string())?;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use copydesk_core::ContentKind;
    use copydesk_library::{ContentStatus, ImageAsset};
    use copydesk_providers::mock::MockPublisher;
    use rusqlite::Connection;

    use super::*;

    fn library() -> LibraryStore {
        let conn = Connection::open_in_memory().unwrap();
        copydesk_library::db::init_db(&conn).unwrap();
        LibraryStore::new(Arc::new(Mutex::new(conn)))
    }

    fn stored(library: &LibraryStore, kind: ContentKind) -> ContentItem {
        let mut item = ContentItem::draft(kind, None);
        item.title = "A title".into();
        item.body = "A body".into();
        item.images = vec![
            ImageAsset { url: "u0".into(), path: Some("/img/0.png".into()), index: 0 },
            ImageAsset { url: "u1".into(), path: None, index: 1 },
        ];
        library.insert(&item).unwrap();
        item
    }

    #[test]
    fn microblog_requests_drop_the_title() {
        let item = ContentItem {
            title: "label".into(),
            ..ContentItem::draft(ContentKind::Microblog, None)
        };
        assert_eq!(publish_request(&item).title, None);
        let article = ContentItem {
            title: "headline".into(),
            ..ContentItem::draft(ContentKind::Article, None)
        };
        assert_eq!(publish_request(&article).title.as_deref(), Some("headline"));
    }

    #[tokio::test]
    async fn success_marks_item_and_account() {
        let library = library();
        let account = library.add_account("main", "uid", serde_json::json!([])).unwrap();
        let item = stored(&library, ContentKind::Article);
        let publisher = MockPublisher::new();

        let receipt = publish_item(&library, &publisher, &item, &account).await.unwrap().unwrap();
        assert!(receipt.success);

        let after = library.require(&item.id).unwrap();
        assert_eq!(after.status, ContentStatus::Published);
        assert!(after.publish_url.is_some());
        assert!(library.get_account(&account.id).unwrap().unwrap().last_publish_at.is_some());
        assert_eq!(publisher.published()[0].image_paths, vec!["/img/0.png".to_string()]);
    }

    #[tokio::test]
    async fn rejection_marks_item_failed() {
        let library = library();
        let account = library.add_account("main", "uid", serde_json::json!([])).unwrap();
        let item = stored(&library, ContentKind::Microblog);
        let publisher = MockPublisher::new();
        publisher.reject(&item.id);

        let receipt = publish_item(&library, &publisher, &item, &account).await.unwrap().unwrap();
        assert!(!receipt.success);
        let after = library.require(&item.id).unwrap();
        assert_eq!(after.status, ContentStatus::Failed);
        assert_eq!(after.error_message.as_deref(), Some("platform rejected the post"));
    }

    #[tokio::test]
    async fn published_item_is_not_sent_again() {
        let library = library();
        let account = library.add_account("main", "uid", serde_json::json!([])).unwrap();
        let item = stored(&library, ContentKind::Article);
        let publisher = MockPublisher::new();

        assert!(publish_item(&library, &publisher, &item, &account).await.unwrap().is_some());
        assert!(publish_item(&library, &publisher, &item, &account).await.unwrap().is_none());
        assert_eq!(publisher.published().len(), 1);
    }
}

//! `copydesk-library`: the persisted content items the pipeline writes and
//! the publishing accounts they are pushed to.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use db::{json_column, lock, text_column, SharedConnection};
pub use error::{LibraryError, Result};
pub use store::{LibraryStore, SortOrder};
pub use types::{Account, AccountStatus, ContentItem, ContentStatus, ImageAsset};

//! `copydesk-core`: configuration, top-level error type and the value types
//! shared by every other copydesk crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::CopydeskConfig;
pub use error::{CopydeskError, Result};
pub use types::{ContentKind, Role};

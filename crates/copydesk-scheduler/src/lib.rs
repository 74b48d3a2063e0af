//! `copydesk-scheduler`: scheduled content jobs.
//!
//! Task definitions live in SQLite ([`store::TaskStore`]). The [`Scheduler`]
//! keeps one trigger per active task and fires it through a [`TaskRunner`],
//! normally the [`TaskExecutor`], which drives the workflow orchestrator and
//! the publisher.
//!
//! # Schedule variants
//!
//! | Variant          | Next fire                                              |
//! |------------------|--------------------------------------------------------|
//! | `Cron`           | Next cron match after now, in the configured zone      |
//! | `FixedInterval`  | Now plus N minutes                                     |
//! | `RandomInterval` | Now plus a random wait, clamped into the active hours  |

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use executor::{TaskExecutor, TaskRunner};
pub use schedule::compute_next_fire;
pub use store::TaskStore;
pub use types::*;

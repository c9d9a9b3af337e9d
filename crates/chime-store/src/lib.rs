//! `chime-store` — durable schedule records with compare-and-swap transitions.
//!
//! # Overview
//!
//! One SQLite `schedules` table holds every callback schedule, with a
//! `(status, due_at)` index so the collector's "what is due now" scan never
//! touches finished work. Every status change goes through
//! [`ScheduleStore::compare_and_transition`], a conditional write guarded by
//! the expected prior status — concurrent collectors, executors, and
//! cancelers coordinate purely through that primitive, no locks.
//!
//! # Lifecycle
//!
//! ```text
//! IDLE ──collector──▶ QUEUED ──executor──▶ SUCCEEDED | FAILED
//!   └──────cancel──▶ CANCELED
//! ```
//!
//! All terminal states are absorbing. Every successful mutation emits one
//! [`feed::ScheduleEvent`] carrying the post-mutation record, which is what
//! triggers the executor.

pub mod db;
pub mod error;
pub mod feed;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use feed::{feed_channel, FeedReceiver, FeedSender, ScheduleEvent};
pub use store::ScheduleStore;
pub use types::{
    CreateInput, DuePage, HttpMethod, ListFilter, ListPage, PageCursor, Schedule, ScheduleStatus,
    TransitionFields,
};

//! `chime-collector` — the periodic due-scan and promotion loop.
//!
//! On a fixed interval (default: once per minute) the collector pages
//! through the store's due scan and promotes each `IDLE` schedule whose due
//! time has passed to `QUEUED` via a compare-and-swap. Promotion is
//! best-effort and idempotent-safe: overlapping collector runs race on the
//! CAS, exactly one wins per schedule, and the loser just drops the item.

pub mod collector;
pub mod error;

pub use collector::{CollectStats, Collector};
pub use error::{CollectorError, Result};

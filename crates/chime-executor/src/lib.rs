//! `chime-executor` — feed-driven callback execution.
//!
//! Consumes change-feed events, and for every record entering `QUEUED`
//! performs the stored HTTP request with a bounded per-attempt timeout and
//! capped exponential backoff, then records the terminal outcome with a
//! compare-and-swap. Duplicate feed deliveries are expected: the first CAS
//! (the `started_at` stamp) filters most of them, and a conflict on the
//! terminal CAS is treated as success — the terminal state is written
//! exactly once per schedule no matter how often the event arrives.
//!
//! Callback-target failures (non-2xx, timeouts, refused connections) are
//! business outcomes recorded in `result`; they never become engine errors.

pub mod error;
pub mod executor;
pub mod result;

pub use error::{ExecutorError, Result};
pub use executor::Executor;
pub use result::CallbackResult;

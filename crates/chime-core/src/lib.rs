//! `chime-core` — shared foundations for the chime workspace.
//!
//! Holds the configuration loader (TOML + `CHIME_*` env overrides), the
//! workspace-level error type, and the injectable [`clock::Clock`] time
//! source that makes the collector and executor deterministic under test.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChimeConfig;
pub use error::{ChimeError, Result};

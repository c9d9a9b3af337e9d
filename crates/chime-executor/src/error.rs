use thiserror::Error;

/// Errors that make the executor drop an event.
///
/// Only store infrastructure faults land here — redelivery of the event is
/// the feed's responsibility, not an internal retry loop. Lost CAS races
/// and failing callbacks are normal outcomes, handled inline.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Store error: {0}")]
    Store(#[from] chime_store::StoreError),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

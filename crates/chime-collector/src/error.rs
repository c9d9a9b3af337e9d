use thiserror::Error;

/// Errors that abort a single collector run.
///
/// Lost CAS races are not errors — they are swallowed inside the run and
/// only counted. A failed run has no side effects beyond transitions
/// already committed; the next tick rediscovers anything still `IDLE`.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Store error: {0}")]
    Store(#[from] chime_store::StoreError),
}

pub type Result<T> = std::result::Result<T, CollectorError>;

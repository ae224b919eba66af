//! Error types for the cache-consistency layer.

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The external system could not serve or accept the request.
    #[error("external source unavailable: {0}")]
    SourceUnavailable(String),

    /// Write-behind buffer is at capacity and the overflow policy is `fail`.
    #[error("write-behind buffer full ({capacity} entries)")]
    BufferFull { capacity: usize },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cache store error: {0}")]
    Store(String),

    /// The strategy has been shut down.
    #[error("cache strategy closed")]
    Closed,
}

impl From<tokio::sync::AcquireError> for CacheError {
    fn from(_: tokio::sync::AcquireError) -> Self {
        CacheError::Closed
    }
}

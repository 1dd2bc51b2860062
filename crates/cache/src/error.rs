//! Cache Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally. In particular [`Database`](ErrorKind::Database) on a write is
/// retryable (SQLITE_BUSY under concurrent readers), while
/// [`Open`](ErrorKind::Open) means the caller should degrade to no-cache
/// mode rather than abort the run.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("unable to open cache database")]
    Open,
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// Serialization/deserialization error on a stored row.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Database)
    }
}

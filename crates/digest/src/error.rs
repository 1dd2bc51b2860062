use derive_more::{Display, Error};

/// A digest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for digest operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("reading input stream for hashing")]
    Io,
    #[display("malformed header descriptor table")]
    Table,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// A parse failure skips the offending catalog with a warning; the run only
/// aborts when no catalog at all survives loading.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("unable to read catalog file")]
    Io,
    #[display("malformed catalog document")]
    Parse,
    #[display("writing catalog document")]
    Emit,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

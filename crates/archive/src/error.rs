use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// A failed archive skips that archive, never the run; callers downgrade
/// these to warnings per input.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("unable to open archive")]
    Open,
    #[display("malformed archive structure")]
    Malformed,
    #[display("unsupported archive feature: {_0}")]
    Unsupported(#[error(not(source))] &'static str),
    #[display("archive entry not found: {_0}")]
    EntryNotFound(#[error(not(source))] String),
    #[display("no 7z binary available on PATH")]
    SevenZipMissing,
    #[display("external 7z process failed")]
    SevenZipFailed,
    #[display("archive I/O error")]
    Io,
    #[display("writing zip archive")]
    Write,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

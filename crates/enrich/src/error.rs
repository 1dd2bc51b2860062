use derive_more::{Display, Error};

/// An enrichment error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for enrichment operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Everything here is contained: enrichment is advisory, so callers log
/// these and continue with the record unenriched. Nothing in this module
/// can fail a run.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("network request failed")]
    Network,
    #[display("unexpected response payload")]
    Payload,
    #[display("reading or writing stored credentials")]
    Credentials,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Network)
    }
}

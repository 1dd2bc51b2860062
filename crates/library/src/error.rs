//! Library Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. The run-level policy lives here too: only
//! configuration errors and catalog exhaustion abort a run, and
//! [`ErrorKind::exit_code`] maps the fatal kinds to the process exit codes
//! the front-end reports.

use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Invalid configuration; fatal before scanning.
    #[display("invalid configuration: {_0}")]
    Config(#[error(not(source))] String),
    /// Every provided catalog failed to load.
    #[display("no usable catalog files")]
    NoCatalogs,
    #[display("scanning inputs")]
    Scan,
    #[display("digesting input")]
    Digest,
    #[display("reading archive")]
    Archive,
    #[display("consulting the checksum cache")]
    Cache,
    #[display("rendering output path template")]
    Template,
    #[display("building the execution plan")]
    Plan,
    #[display("executing a plan action")]
    Execute,
    #[display("writing a report artifact")]
    Report,
    #[display("filesystem error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }

    /// Process exit code for errors that abort a run. Per-record and
    /// per-action failures never reach this; they accumulate in the summary
    /// and surface as exit code 1 at the end.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Config(_) => 2,
            ErrorKind::NoCatalogs => 3,
            _ => 1,
        }
    }
}

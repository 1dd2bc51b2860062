pub(crate) mod file;
mod stream;

pub use self::file::{hash_archive_entries, hash_regular_file};
pub use self::stream::{ScanEvent, scan};

//! The unit the scanner emits: one hashable payload and its digests.

use romsort_digest::{DigestSet, HeaderHit};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// One scanned payload: a file on disk, or one entry inside an archive.
///
/// Immutable once emitted. Identity is the SHA-256 of the hashable payload;
/// `source` plus `entry` locates where that payload physically lives. A
/// record reachable through an archive counts as one source, so two
/// `RomFile`s never share a `(source, entry)` pair within a run.
#[derive(Clone, Debug, Serialize)]
pub struct RomFile {
    /// Absolute path of the file, or of the enclosing archive.
    pub source: PathBuf,
    /// Entry name inside the archive, when `source` is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<PathBuf>,
    /// Size of the hashable payload (header excluded).
    pub size: u64,
    pub digests: DigestSet,
    /// Detected header, when the payload sits behind one.
    #[serde(skip)]
    pub header: Option<HeaderHit>,
    #[serde(skip)]
    pub modified: Option<OffsetDateTime>,
}

impl RomFile {
    /// The name used for name-based matching and for output paths: the
    /// entry name inside an archive, the file name otherwise.
    pub fn display_name(&self) -> String {
        let path = self.entry.as_deref().unwrap_or(&self.source);
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }

    /// The directory name the payload came from, for `{inputDirname}`.
    pub fn input_dirname(&self) -> Option<String> {
        self.source
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
    }

    /// Canonical ordering key. Sorting records by this key before selection
    /// is what makes the pipeline order-independent.
    pub fn sort_key(&self) -> (&Path, Option<&Path>) {
        (&self.source, self.entry.as_deref())
    }

    pub fn is_archived(&self) -> bool {
        self.entry.is_some()
    }
}

/// Why a discovered file produced no record, or a record got dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `7z`/`7za` not found on PATH.
    SevenZipUnavailable,
    /// Archive could not be read; the archive was skipped, not the run.
    UnreadableArchive,
    /// The payload could not be hashed; it can still match by name+size.
    DigestFailed,
    /// Filesystem error discovering or reading the file.
    Unreadable,
    FailedIncludeFilter,
    MatchedExcludeFilter,
    /// A preferred variant of the same title was selected instead.
    PreferredVariantKept,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SkipReason::SevenZipUnavailable => "no 7z binary available",
            SkipReason::UnreadableArchive => "archive could not be read",
            SkipReason::DigestFailed => "payload could not be hashed",
            SkipReason::Unreadable => "file could not be read",
            SkipReason::FailedIncludeFilter => "failed include filter",
            SkipReason::MatchedExcludeFilter => "matched exclude filter",
            SkipReason::PreferredVariantKept => "a preferred variant was kept",
        };
        f.write_str(text)
    }
}

/// A skipped path with its reason and optional human detail.
#[derive(Clone, Debug, Serialize)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

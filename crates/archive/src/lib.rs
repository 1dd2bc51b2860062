//! Archive access behind one surface, plus the deterministic zip writer.
//!
//! Two read back-ends hide behind [`ArchiveKind`]:
//!
//! - **Zip** is parsed natively ([`zip::ZipFile`]): central directory walk,
//!   stored and DEFLATE entries, every offset validated against the file
//!   length before use.
//! - **7z** delegates to an external `7z`/`7za` binary found on `PATH`
//!   ([`sevenzip::SevenZip`]). A missing binary is not an error; the caller
//!   skips the archive with a warning.
//!
//! Writing is a separate concern: [`torrentzip`] produces canonical,
//! byte-reproducible zip archives.
//!
//! Back-end selection prefers magic-byte sniffing over the file extension;
//! a mislabelled `.zip` that is really a 7z container still routes to the
//! right reader.

pub mod error;
pub mod sevenzip;
pub mod torrentzip;
pub mod zip;

use std::path::{Path, PathBuf};

/// Magic for a zip local file header (and friends: `PK` + record type).
const ZIP_MAGIC: [u8; 2] = [0x50, 0x4B];
/// 7-zip signature: `7z` BC AF 27 1C.
const SEVENZ_MAGIC: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// A supported archive container format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Zip,
    SevenZ,
}

impl ArchiveKind {
    /// Detect the container format from leading magic bytes, falling back to
    /// the file extension when the prefix is inconclusive.
    pub fn sniff(path: &Path, prefix: &[u8]) -> Option<ArchiveKind> {
        if prefix.starts_with(&SEVENZ_MAGIC) {
            return Some(ArchiveKind::SevenZ);
        }
        if prefix.len() >= 4
            && prefix[..2] == ZIP_MAGIC
            && matches!((prefix[2], prefix[3]), (1, 2) | (3, 4) | (5, 6) | (7, 8))
        {
            return Some(ArchiveKind::Zip);
        }
        Self::from_extension(path)
    }

    /// Detect the container format from the file extension alone.
    pub fn from_extension(path: &Path) -> Option<ArchiveKind> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "zip" => Some(ArchiveKind::Zip),
            "7z" => Some(ArchiveKind::SevenZ),
            _ => None,
        }
    }
}

/// One member of an archive, as reported by `list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry name as stored in the archive (forward slashes).
    pub name: PathBuf,
    /// Uncompressed size in bytes.
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.zip", b"PK\x03\x04....", Some(ArchiveKind::Zip))]
    #[case("a.zip", b"PK\x05\x06....", Some(ArchiveKind::Zip))]
    #[case("a.7z", b"7z\xBC\xAF\x27\x1C..", Some(ArchiveKind::SevenZ))]
    // Magic wins over a lying extension.
    #[case("a.zip", b"7z\xBC\xAF\x27\x1C..", Some(ArchiveKind::SevenZ))]
    // Extension fallback when the prefix is not an archive signature.
    #[case("a.7z", b"????????", Some(ArchiveKind::SevenZ))]
    #[case("a.nes", b"NES\x1a....", None)]
    #[case("a.bin", b"", None)]
    fn sniff_cases(#[case] name: &str, #[case] prefix: &[u8], #[case] expected: Option<ArchiveKind>) {
        assert_eq!(ArchiveKind::sniff(Path::new(name), prefix), expected);
    }
}

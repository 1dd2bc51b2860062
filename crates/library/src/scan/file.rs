//! Per-file hashing: the blocking half of the scan pipeline.
//!
//! Everything here is synchronous and runs inside `spawn_blocking`; the
//! async stream in [`super::stream`] owns scheduling and backpressure.

use crate::error::{ErrorKind, Result};
use crate::file::RomFile;
use exn::ResultExt;
use romsort_archive::zip::ZipFile;
use romsort_digest::{AlgoSet, Digester, HeaderTable, header::PROBE_LEN};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Read up to [`PROBE_LEN`] leading bytes for header detection and archive
/// sniffing.
pub(crate) fn read_prefix(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).or_raise(|| ErrorKind::Io)?;
    let mut prefix = vec![0u8; PROBE_LEN];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = file.read(&mut prefix[filled..]).or_raise(|| ErrorKind::Io)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    prefix.truncate(filled);
    Ok(prefix)
}

/// Hash one loose file, header-aware.
pub fn hash_regular_file(path: &Path, prefix: &[u8]) -> Result<RomFile> {
    let metadata = std::fs::metadata(path).or_raise(|| ErrorKind::Io)?;
    let header = HeaderTable::builtin().detect(path, prefix, metadata.len());

    let file = File::open(path).or_raise(|| ErrorKind::Io)?;
    let mut digester = Digester::new();
    let (digests, hashed) = digester
        .digest(file, AlgoSet::ALL, header.as_ref())
        .or_raise(|| ErrorKind::Digest)?;

    Ok(RomFile {
        source: path.to_path_buf(),
        entry: None,
        size: hashed,
        digests,
        header,
        modified: metadata.modified().ok().map(OffsetDateTime::from),
    })
}

/// Hash every file entry of a zip archive, header-aware per entry.
pub fn hash_archive_entries(path: &Path) -> Result<Vec<RomFile>> {
    let zip = ZipFile::open(path).or_raise(|| ErrorKind::Archive)?;
    let modified = std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .map(OffsetDateTime::from);

    let mut digester = Digester::new();
    let mut records = Vec::new();
    for meta in zip.entries() {
        if meta.is_dir() {
            continue;
        }
        let mut reader = zip.open_entry(meta).or_raise(|| ErrorKind::Archive)?;

        // Pull the probe prefix out of the stream, detect, then hash the
        // prefix remainder chained with the rest of the stream.
        let mut prefix = Vec::with_capacity(PROBE_LEN.min(meta.uncompressed_size as usize));
        (&mut reader)
            .take(PROBE_LEN as u64)
            .read_to_end(&mut prefix)
            .or_raise(|| ErrorKind::Archive)?;
        let entry_path = PathBuf::from(&meta.name);
        let header =
            HeaderTable::builtin().detect(&entry_path, &prefix, meta.uncompressed_size);

        let chained = std::io::Cursor::new(prefix).chain(reader);
        let (digests, hashed) = digester
            .digest(chained, AlgoSet::ALL, header.as_ref())
            .or_raise(|| ErrorKind::Digest)?;

        records.push(RomFile {
            source: path.to_path_buf(),
            entry: Some(entry_path),
            size: hashed,
            digests,
            header,
            modified,
        });
    }
    Ok(records)
}

/// Hash an in-memory payload extracted from a 7z archive.
pub(crate) fn hash_extracted_bytes(
    archive: &Path,
    entry: &Path,
    bytes: &[u8],
) -> Result<RomFile> {
    let header = HeaderTable::builtin().detect(entry, bytes, bytes.len() as u64);
    let mut digester = Digester::new();
    let (digests, hashed) = digester
        .digest(std::io::Cursor::new(bytes), AlgoSet::ALL, header.as_ref())
        .or_raise(|| ErrorKind::Digest)?;
    Ok(RomFile {
        source: archive.to_path_buf(),
        entry: Some(entry.to_path_buf()),
        size: hashed,
        digests,
        header,
        modified: None,
    })
}

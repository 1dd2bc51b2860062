//! Native zip reader: EOCD + central directory walk, stored/deflate entries.
//!
//! # Invariants
//! - All sizes/offsets come from the file and are validated against the file
//!   length before any seek.
//! - Entries are surfaced in central-directory order.
//!
//! # Not Supported
//! - Zip64 archives (sentinel 0xFFFF/0xFFFFFFFF fields) — surfaced as
//!   `Unsupported`, which callers downgrade to an archive skip.
//! - Encrypted entries and compression methods other than stored/deflate;
//!   such entries are listed but refuse to open.
//!
//! All I/O here is synchronous; callers run it inside `spawn_blocking`.

use crate::ArchiveEntry;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const SIG_EOCD: u32 = 0x0605_4B50;
const SIG_CDFH: u32 = 0x0201_4B50;
const SIG_LFH: u32 = 0x0403_4B50;

const EOCD_MIN_LEN: u64 = 22;
// 64 KiB max comment plus the fixed EOCD fields.
const EOCD_SEARCH_MAX: u64 = 66 * 1024;

const CDFH_LEN: usize = 46;
const LFH_LEN: usize = 30;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// Central-directory metadata for a single entry.
#[derive(Clone, Debug)]
pub struct ZipEntryMeta {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    local_header_offset: u64,
}

impl ZipEntryMeta {
    pub fn is_encrypted(&self) -> bool {
        (self.flags & 0x0001) != 0
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    fn compression_supported(&self) -> bool {
        self.method == METHOD_STORED || self.method == METHOD_DEFLATE
    }
}

/// An opened zip archive with its central directory parsed up front.
pub struct ZipFile {
    path: PathBuf,
    file_len: u64,
    entries: Vec<ZipEntryMeta>,
}

impl ZipFile {
    /// Open an archive and parse its central directory.
    pub fn open(path: &Path) -> Result<ZipFile> {
        let mut file = File::open(path).or_raise(|| ErrorKind::Open)?;
        let file_len = file.metadata().or_raise(|| ErrorKind::Open)?.len();
        if file_len < EOCD_MIN_LEN {
            exn::bail!(ErrorKind::Malformed);
        }

        let (cd_offset, cd_size, entry_count) = find_eocd(&mut file, file_len)?;
        if cd_offset.saturating_add(cd_size) > file_len {
            exn::bail!(ErrorKind::Malformed);
        }

        let mut cd = vec![0u8; cd_size as usize];
        file.seek(SeekFrom::Start(cd_offset)).or_raise(|| ErrorKind::Io)?;
        file.read_exact(&mut cd).or_raise(|| ErrorKind::Malformed)?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut pos = 0usize;
        for _ in 0..entry_count {
            let (meta, advance) = parse_cdfh(&cd[pos..], file_len)?;
            entries.push(meta);
            pos += advance;
        }

        Ok(ZipFile { path: path.to_path_buf(), file_len, entries })
    }

    pub fn entries(&self) -> &[ZipEntryMeta] {
        &self.entries
    }

    /// The listing shape shared with the 7z back-end: files only, no
    /// directory placeholders.
    pub fn list(&self) -> Vec<ArchiveEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_dir())
            .map(|e| ArchiveEntry { name: PathBuf::from(&e.name), size: e.uncompressed_size })
            .collect()
    }

    pub fn entry(&self, name: &str) -> Option<&ZipEntryMeta> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Open a decompressing reader over one entry's payload.
    ///
    /// The local header is re-parsed at open time because its name/extra
    /// lengths may differ from the central directory's copy.
    pub fn open_entry(&self, entry: &ZipEntryMeta) -> Result<Box<dyn Read + Send>> {
        if entry.is_encrypted() {
            exn::bail!(ErrorKind::Unsupported("encrypted entry"));
        }
        if !entry.compression_supported() {
            exn::bail!(ErrorKind::Unsupported("compression method"));
        }

        let mut file = File::open(&self.path).or_raise(|| ErrorKind::Open)?;
        file.seek(SeekFrom::Start(entry.local_header_offset)).or_raise(|| ErrorKind::Io)?;
        let mut lfh = [0u8; LFH_LEN];
        file.read_exact(&mut lfh).or_raise(|| ErrorKind::Malformed)?;
        if read_u32(&lfh, 0) != SIG_LFH {
            exn::bail!(ErrorKind::Malformed);
        }
        let name_len = u64::from(read_u16(&lfh, 26));
        let extra_len = u64::from(read_u16(&lfh, 28));

        let data_start = entry
            .local_header_offset
            .checked_add(LFH_LEN as u64 + name_len + extra_len)
            .ok_or_raise(|| ErrorKind::Malformed)?;
        if data_start.saturating_add(entry.compressed_size) > self.file_len {
            exn::bail!(ErrorKind::Malformed);
        }
        file.seek(SeekFrom::Start(data_start)).or_raise(|| ErrorKind::Io)?;

        let compressed = file.take(entry.compressed_size);
        Ok(match entry.method {
            METHOD_STORED => Box::new(compressed),
            _ => Box::new(DeflateDecoder::new(compressed)),
        })
    }
}

/// Scan backwards for the EOCD record and return
/// `(cd_offset, cd_size, entry_count)`.
fn find_eocd(file: &mut File, file_len: u64) -> Result<(u64, u64, u16)> {
    let search_len = file_len.min(EOCD_SEARCH_MAX);
    let search_start = file_len - search_len;
    let mut tail = vec![0u8; search_len as usize];
    file.seek(SeekFrom::Start(search_start)).or_raise(|| ErrorKind::Io)?;
    file.read_exact(&mut tail).or_raise(|| ErrorKind::Io)?;

    let sig = SIG_EOCD.to_le_bytes();
    let pos = tail
        .windows(4)
        .rposition(|w| w == sig)
        .ok_or_raise(|| ErrorKind::Malformed)?;
    if tail.len() - pos < EOCD_MIN_LEN as usize {
        exn::bail!(ErrorKind::Malformed);
    }
    let eocd = &tail[pos..];

    let entries_total = read_u16(eocd, 10);
    let cd_size = u64::from(read_u32(eocd, 12));
    let cd_offset = u64::from(read_u32(eocd, 16));

    // Zip64 archives park sentinels here and move the real values to the
    // EOCD64 record, which this reader does not follow.
    if entries_total == 0xFFFF || cd_size == 0xFFFF_FFFF as u64 || cd_offset == 0xFFFF_FFFF as u64 {
        exn::bail!(ErrorKind::Unsupported("zip64"));
    }

    Ok((cd_offset, cd_size, entries_total))
}

/// Parse one central-directory file header, returning the entry and how many
/// bytes it occupied.
fn parse_cdfh(buf: &[u8], file_len: u64) -> Result<(ZipEntryMeta, usize)> {
    if buf.len() < CDFH_LEN || read_u32(buf, 0) != SIG_CDFH {
        exn::bail!(ErrorKind::Malformed);
    }

    let flags = read_u16(buf, 8);
    let method = read_u16(buf, 10);
    let crc32 = read_u32(buf, 16);
    let compressed_size = u64::from(read_u32(buf, 20));
    let uncompressed_size = u64::from(read_u32(buf, 24));
    let name_len = usize::from(read_u16(buf, 28));
    let extra_len = usize::from(read_u16(buf, 30));
    let comment_len = usize::from(read_u16(buf, 32));
    let local_header_offset = u64::from(read_u32(buf, 42));

    if compressed_size == 0xFFFF_FFFF as u64
        || uncompressed_size == 0xFFFF_FFFF as u64
        || local_header_offset == 0xFFFF_FFFF as u64
    {
        exn::bail!(ErrorKind::Unsupported("zip64"));
    }
    if local_header_offset >= file_len {
        exn::bail!(ErrorKind::Malformed);
    }

    let advance = CDFH_LEN + name_len + extra_len + comment_len;
    if buf.len() < advance {
        exn::bail!(ErrorKind::Malformed);
    }
    let name = String::from_utf8_lossy(&buf[CDFH_LEN..CDFH_LEN + name_len]).into_owned();

    Ok((
        ZipEntryMeta {
            name,
            flags,
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            local_header_offset,
        },
        advance,
    ))
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrentzip::{MemberSource, ZipMember, write_torrentzip};

    fn write_fixture(dir: &Path, members: &[(&str, &[u8])]) -> PathBuf {
        let dest = dir.join("fixture.zip");
        let members: Vec<ZipMember> = members
            .iter()
            .map(|(name, data)| ZipMember {
                name: (*name).to_string(),
                source: MemberSource::Bytes(data.to_vec()),
            })
            .collect();
        write_torrentzip(&dest, members).unwrap();
        dest
    }

    #[test]
    fn lists_and_reads_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &[("b.bin", b"bravo"), ("a.bin", b"alpha")]);

        let zip = ZipFile::open(&path).unwrap();
        let listing = zip.list();
        assert_eq!(listing.len(), 2);
        // Writer sorts by lowercase name.
        assert_eq!(listing[0].name, PathBuf::from("a.bin"));
        assert_eq!(listing[0].size, 5);

        let meta = zip.entry("b.bin").unwrap().clone();
        let mut reader = zip.open_entry(&meta).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"bravo");
    }

    #[test]
    fn entry_crc_matches_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &[("x.bin", b"hello zip")]);
        let zip = ZipFile::open(&path).unwrap();
        let meta = zip.entry("x.bin").unwrap();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(b"hello zip");
        assert_eq!(meta.crc32, hasher.finalize());
    }

    #[test]
    fn rejects_non_zip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not.zip");
        std::fs::write(&path, b"this is absolutely not a zip archive, promise").unwrap();
        assert!(ZipFile::open(&path).is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.zip");
        std::fs::write(&path, b"PK").unwrap();
        assert!(ZipFile::open(&path).is_err());
    }

    #[test]
    fn missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &[("only.bin", b"data")]);
        let zip = ZipFile::open(&path).unwrap();
        assert!(zip.entry("other.bin").is_none());
    }
}

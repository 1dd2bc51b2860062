//! Canonical "TorrentZip" writer.
//!
//! Two runs over the same members must produce byte-identical archives, so
//! every field a zip writer is normally free to vary is pinned:
//!
//! - entries sorted by lowercase name, then name;
//! - all timestamps forced to the TorrentZip epoch (1996-12-24 23:32:00);
//! - DEFLATE at maximum compression, general-purpose flag bit 1 set;
//! - filenames stored as CP437 where encodable (UTF-8 flag otherwise);
//! - no extra fields or comments, except the end-of-central-directory
//!   comment `TORRENTZIPPED-XXXXXXXX` carrying the uppercase hex CRC32 of
//!   the central directory bytes (an integrity self-check);
//! - Zip64 records appear exactly when an entry, the directory offset, or
//!   the entry count overflows the classic fields.
//!
//! Writing is streaming: local headers and payloads are appended (headers
//! patched once sizes are known), then the central directory, then the EOCD.
//! A failure mid-write deletes the target so no half-archive survives.
//!
//! All I/O here is synchronous; callers run it inside `spawn_blocking`.

use crate::error::{ErrorKind, Result};
use crc32fast::Hasher as Crc32;
use exn::ResultExt;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// DOS-encoded 23:32:00 — the historical TorrentZip epoch time.
pub const EPOCH_DOS_TIME: u16 = 0xBC00;
/// DOS-encoded 1996-12-24 — the historical TorrentZip epoch date.
pub const EPOCH_DOS_DATE: u16 = 0x2198;

/// General-purpose flag bit 1: DEFLATE at maximum compression.
const FLAG_MAX_COMPRESSION: u16 = 0x0002;
/// General-purpose flag bit 11: filename is UTF-8 (set only when a name
/// cannot be encoded as CP437).
const FLAG_UTF8: u16 = 0x0800;

const METHOD_DEFLATE: u16 = 8;
const VERSION_CLASSIC: u16 = 20;
const VERSION_ZIP64: u16 = 45;

const U16_MAX: usize = 0xFFFF;
const U32_MAX: u64 = 0xFFFF_FFFF;

const COPY_BUF: usize = 1 << 20;

/// Where a member's payload comes from.
pub enum MemberSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// One file to pack into the archive.
pub struct ZipMember {
    /// Name inside the archive (forward slashes).
    pub name: String,
    pub source: MemberSource,
}

struct EntryRecord {
    raw_name: Vec<u8>,
    flags: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    zip64: bool,
}

impl EntryRecord {
    fn needs_central_zip64(&self) -> bool {
        self.compressed_size > U32_MAX
            || self.uncompressed_size > U32_MAX
            || self.local_header_offset > U32_MAX
    }
}

/// Deletes the target on drop unless the write ran to completion.
struct PendingFile<'a> {
    path: &'a Path,
    committed: bool,
}

impl Drop for PendingFile<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(self.path);
        }
    }
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Write `members` as a canonical TorrentZip archive at `dest`.
#[instrument(skip(members), fields(dest = %dest.display(), members = members.len()))]
pub fn write_torrentzip(dest: &Path, mut members: Vec<ZipMember>) -> Result<()> {
    members.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut guard = PendingFile { path: dest, committed: false };
    let mut out = File::create(dest).or_raise(|| ErrorKind::Write)?;

    let mut entries = Vec::with_capacity(members.len());
    for member in &members {
        let entry = append_member(&mut out, member)?;
        entries.push(entry);
    }

    write_central_and_eocd(&mut out, &entries)?;
    out.flush().or_raise(|| ErrorKind::Write)?;
    guard.committed = true;
    Ok(())
}

fn append_member(out: &mut File, member: &ZipMember) -> Result<EntryRecord> {
    let (raw_name, flags) = match encode_cp437(&member.name) {
        Some(raw) => (raw, FLAG_MAX_COMPRESSION),
        None => (member.name.as_bytes().to_vec(), FLAG_MAX_COMPRESSION | FLAG_UTF8),
    };

    let size_hint = match &member.source {
        MemberSource::Path(path) => {
            std::fs::metadata(path).or_raise(|| ErrorKind::Io)?.len()
        },
        MemberSource::Bytes(bytes) => bytes.len() as u64,
    };
    // Decide Zip64 before compressing. Incompressible input can grow by a
    // handful of bytes per 64 KiB block, so a small margin keeps the choice
    // safe without ever flipping it for ordinary sizes.
    let zip64 = size_hint + size_hint / 512 + 64 > U32_MAX;

    let local_header_offset = out.stream_position().or_raise(|| ErrorKind::Io)?;
    let mut lfh = Vec::with_capacity(64 + raw_name.len());
    le32(&mut lfh, 0x0403_4B50);
    le16(&mut lfh, if zip64 { VERSION_ZIP64 } else { VERSION_CLASSIC });
    le16(&mut lfh, flags);
    le16(&mut lfh, METHOD_DEFLATE);
    le16(&mut lfh, EPOCH_DOS_TIME);
    le16(&mut lfh, EPOCH_DOS_DATE);
    le32(&mut lfh, 0); // crc32, patched below
    if zip64 {
        le32(&mut lfh, 0xFFFF_FFFF);
        le32(&mut lfh, 0xFFFF_FFFF);
        le16(&mut lfh, raw_name.len() as u16);
        le16(&mut lfh, 20); // zip64 extra: id + len + two u64s
        lfh.extend_from_slice(&raw_name);
        le16(&mut lfh, 0x0001);
        le16(&mut lfh, 16);
        le64(&mut lfh, 0); // uncompressed, patched below
        le64(&mut lfh, 0); // compressed, patched below
    } else {
        le32(&mut lfh, 0); // compressed, patched below
        le32(&mut lfh, 0); // uncompressed, patched below
        le16(&mut lfh, raw_name.len() as u16);
        le16(&mut lfh, 0);
        lfh.extend_from_slice(&raw_name);
    }
    out.write_all(&lfh).or_raise(|| ErrorKind::Write)?;

    // Stream-compress the payload, hashing the uncompressed bytes and
    // counting the compressed ones.
    let counter = CountingWriter { inner: &mut *out, written: 0 };
    let mut encoder = DeflateEncoder::new(counter, Compression::best());
    let mut hasher = Crc32::new();
    let mut uncompressed_size = 0u64;
    let mut buf = vec![0u8; COPY_BUF];
    let mut reader: Box<dyn Read> = match &member.source {
        MemberSource::Path(path) => {
            Box::new(File::open(path).or_raise(|| ErrorKind::Io)?)
        },
        MemberSource::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
    };
    loop {
        let n = reader.read(&mut buf).or_raise(|| ErrorKind::Io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        uncompressed_size += n as u64;
        encoder.write_all(&buf[..n]).or_raise(|| ErrorKind::Write)?;
    }
    let counter = encoder.finish().or_raise(|| ErrorKind::Write)?;
    let compressed_size = counter.written;
    let crc32 = hasher.finalize();

    if !zip64 && (compressed_size > U32_MAX || uncompressed_size > U32_MAX) {
        exn::bail!(ErrorKind::Write);
    }

    // Patch the header fields we could not know up front.
    let data_end = out.stream_position().or_raise(|| ErrorKind::Io)?;
    out.seek(SeekFrom::Start(local_header_offset + 14)).or_raise(|| ErrorKind::Io)?;
    out.write_all(&crc32.to_le_bytes()).or_raise(|| ErrorKind::Write)?;
    if zip64 {
        let extra_values = local_header_offset + 30 + raw_name.len() as u64 + 4;
        out.seek(SeekFrom::Start(extra_values)).or_raise(|| ErrorKind::Io)?;
        out.write_all(&uncompressed_size.to_le_bytes()).or_raise(|| ErrorKind::Write)?;
        out.write_all(&compressed_size.to_le_bytes()).or_raise(|| ErrorKind::Write)?;
    } else {
        out.write_all(&(compressed_size as u32).to_le_bytes()).or_raise(|| ErrorKind::Write)?;
        out.write_all(&(uncompressed_size as u32).to_le_bytes()).or_raise(|| ErrorKind::Write)?;
    }
    out.seek(SeekFrom::Start(data_end)).or_raise(|| ErrorKind::Io)?;

    Ok(EntryRecord {
        raw_name,
        flags,
        crc32,
        compressed_size,
        uncompressed_size,
        local_header_offset,
        zip64,
    })
}

fn write_central_and_eocd<W: Write + Seek>(out: &mut W, entries: &[EntryRecord]) -> Result<()> {
    let cd_offset = out.stream_position().or_raise(|| ErrorKind::Io)?;

    let mut cd = Vec::new();
    for entry in entries {
        let central_zip64 = entry.needs_central_zip64();
        let version = if entry.zip64 || central_zip64 { VERSION_ZIP64 } else { VERSION_CLASSIC };
        le32(&mut cd, 0x0201_4B50);
        le16(&mut cd, version); // version made by
        le16(&mut cd, version); // version needed
        le16(&mut cd, entry.flags);
        le16(&mut cd, METHOD_DEFLATE);
        le16(&mut cd, EPOCH_DOS_TIME);
        le16(&mut cd, EPOCH_DOS_DATE);
        le32(&mut cd, entry.crc32);
        if central_zip64 {
            le32(&mut cd, 0xFFFF_FFFF);
            le32(&mut cd, 0xFFFF_FFFF);
        } else {
            le32(&mut cd, entry.compressed_size as u32);
            le32(&mut cd, entry.uncompressed_size as u32);
        }
        le16(&mut cd, entry.raw_name.len() as u16);
        le16(&mut cd, if central_zip64 { 28 } else { 0 }); // extra len
        le16(&mut cd, 0); // comment len
        le16(&mut cd, 0); // disk number start
        le16(&mut cd, 0); // internal attrs
        le32(&mut cd, 0); // external attrs
        if central_zip64 {
            le32(&mut cd, 0xFFFF_FFFF);
        } else {
            le32(&mut cd, entry.local_header_offset as u32);
        }
        cd.extend_from_slice(&entry.raw_name);
        if central_zip64 {
            le16(&mut cd, 0x0001);
            le16(&mut cd, 24);
            le64(&mut cd, entry.uncompressed_size);
            le64(&mut cd, entry.compressed_size);
            le64(&mut cd, entry.local_header_offset);
        }
    }

    let mut hasher = Crc32::new();
    hasher.update(&cd);
    let cd_crc = hasher.finalize();

    out.write_all(&cd).or_raise(|| ErrorKind::Write)?;

    let cd_size = cd.len() as u64;
    let need_zip64 = entries.len() > U16_MAX
        || cd_offset > U32_MAX
        || cd_size > U32_MAX
        || entries.iter().any(|e| e.zip64 || e.needs_central_zip64());

    if need_zip64 {
        let eocd64_offset = out.stream_position().or_raise(|| ErrorKind::Io)?;
        let mut eocd64 = Vec::with_capacity(76);
        le32(&mut eocd64, 0x0606_4B50);
        le64(&mut eocd64, 44); // size of remaining record
        le16(&mut eocd64, VERSION_ZIP64);
        le16(&mut eocd64, VERSION_ZIP64);
        le32(&mut eocd64, 0); // this disk
        le32(&mut eocd64, 0); // cd start disk
        le64(&mut eocd64, entries.len() as u64);
        le64(&mut eocd64, entries.len() as u64);
        le64(&mut eocd64, cd_size);
        le64(&mut eocd64, cd_offset);
        // locator
        le32(&mut eocd64, 0x0706_4B50);
        le32(&mut eocd64, 0);
        le64(&mut eocd64, eocd64_offset);
        le32(&mut eocd64, 1);
        out.write_all(&eocd64).or_raise(|| ErrorKind::Write)?;
    }

    let comment = format!("TORRENTZIPPED-{cd_crc:08X}");
    let mut eocd = Vec::with_capacity(22 + comment.len());
    le32(&mut eocd, 0x0605_4B50);
    le16(&mut eocd, 0);
    le16(&mut eocd, 0);
    let count = if entries.len() > U16_MAX { 0xFFFF } else { entries.len() as u16 };
    le16(&mut eocd, count);
    le16(&mut eocd, count);
    le32(&mut eocd, if cd_size > U32_MAX { 0xFFFF_FFFF } else { cd_size as u32 });
    le32(&mut eocd, if cd_offset > U32_MAX { 0xFFFF_FFFF } else { cd_offset as u32 });
    le16(&mut eocd, comment.len() as u16);
    eocd.extend_from_slice(comment.as_bytes());
    out.write_all(&eocd).or_raise(|| ErrorKind::Write)?;

    Ok(())
}

/// CP437 code points for bytes 0x80..=0xFF. ASCII maps through unchanged.
const CP437_HIGH: [char; 128] = [
    '\u{00C7}', '\u{00FC}', '\u{00E9}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E5}', '\u{00E7}',
    '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00EF}', '\u{00EE}', '\u{00EC}', '\u{00C4}', '\u{00C5}',
    '\u{00C9}', '\u{00E6}', '\u{00C6}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00FB}', '\u{00F9}',
    '\u{00FF}', '\u{00D6}', '\u{00DC}', '\u{00A2}', '\u{00A3}', '\u{00A5}', '\u{20A7}', '\u{0192}',
    '\u{00E1}', '\u{00ED}', '\u{00F3}', '\u{00FA}', '\u{00F1}', '\u{00D1}', '\u{00AA}', '\u{00BA}',
    '\u{00BF}', '\u{2310}', '\u{00AC}', '\u{00BD}', '\u{00BC}', '\u{00A1}', '\u{00AB}', '\u{00BB}',
    '\u{2591}', '\u{2592}', '\u{2593}', '\u{2502}', '\u{2524}', '\u{2561}', '\u{2562}', '\u{2556}',
    '\u{2555}', '\u{2563}', '\u{2551}', '\u{2557}', '\u{255D}', '\u{255C}', '\u{255B}', '\u{2510}',
    '\u{2514}', '\u{2534}', '\u{252C}', '\u{251C}', '\u{2500}', '\u{253C}', '\u{255E}', '\u{255F}',
    '\u{255A}', '\u{2554}', '\u{2569}', '\u{2566}', '\u{2560}', '\u{2550}', '\u{256C}', '\u{2567}',
    '\u{2568}', '\u{2564}', '\u{2565}', '\u{2559}', '\u{2558}', '\u{2552}', '\u{2553}', '\u{256B}',
    '\u{256A}', '\u{2518}', '\u{250C}', '\u{2588}', '\u{2584}', '\u{258C}', '\u{2590}', '\u{2580}',
    '\u{03B1}', '\u{00DF}', '\u{0393}', '\u{03C0}', '\u{03A3}', '\u{03C3}', '\u{00B5}', '\u{03C4}',
    '\u{03A6}', '\u{0398}', '\u{03A9}', '\u{03B4}', '\u{221E}', '\u{03C6}', '\u{03B5}', '\u{2229}',
    '\u{2261}', '\u{00B1}', '\u{2265}', '\u{2264}', '\u{2320}', '\u{2321}', '\u{00F7}', '\u{2248}',
    '\u{00B0}', '\u{2219}', '\u{00B7}', '\u{221A}', '\u{207F}', '\u{00B2}', '\u{25A0}', '\u{00A0}',
];

/// Encode to CP437 bytes, or `None` when any character has no CP437 slot.
fn encode_cp437(name: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii() {
            out.push(ch as u8);
            continue;
        }
        let index = CP437_HIGH.iter().position(|&c| c == ch)?;
        out.push(0x80 + index as u8);
    }
    Some(out)
}

fn le16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn le32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn le64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

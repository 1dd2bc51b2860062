//! Single-pass streaming digest computation.

use crate::error::{ErrorKind, Result};
use crate::header::HeaderHit;
use crate::{AlgoSet, DigestSet};
use crc32fast::Hasher as Crc32;
use exn::ResultExt;
use md5::{Digest as _, Md5};
use sha1::Sha1;
use sha2::Sha256;
use std::io::Read;
use tracing::instrument;

/// Read buffer size. One buffer per [`Digester`], reused across files.
pub const BUFFER_SIZE: usize = 1 << 20;

/// Streaming hasher driving every requested algorithm over one read pass.
///
/// Instances are single-threaded and hold a reusable read buffer; spawn one
/// per worker. The input is consumed exactly once; a short read simply ends
/// the stream and is not an error.
pub struct Digester {
    buf: Vec<u8>,
}

impl Default for Digester {
    fn default() -> Self {
        Self::new()
    }
}

impl Digester {
    pub fn new() -> Self {
        Self { buf: vec![0u8; BUFFER_SIZE] }
    }

    /// Hash `reader` with every algorithm in `want`.
    ///
    /// When `header` is present its `skip` leading bytes are consumed and
    /// discarded before any hasher sees data; the skipped count still
    /// contributes to the returned total so progress reporting can account
    /// for every byte read. Returns the digests and the hashed payload
    /// length (header bytes excluded).
    #[instrument(skip_all, fields(skip = header.map(|h| h.skip).unwrap_or(0)))]
    pub fn digest<R: Read>(
        &mut self,
        mut reader: R,
        want: AlgoSet,
        header: Option<&HeaderHit>,
    ) -> Result<(DigestSet, u64)> {
        if let Some(header) = header {
            let mut remaining = header.skip;
            while remaining > 0 {
                let take = remaining.min(self.buf.len() as u64) as usize;
                let n = reader.read(&mut self.buf[..take]).or_raise(|| ErrorKind::Io)?;
                if n == 0 {
                    break;
                }
                remaining -= n as u64;
            }
        }

        let mut crc32 = want.crc32.then(Crc32::new);
        let mut md5 = want.md5.then(Md5::new);
        let mut sha1 = want.sha1.then(Sha1::new);
        let mut sha256 = want.sha256.then(Sha256::new);

        let mut hashed = 0u64;
        loop {
            let n = reader.read(&mut self.buf).or_raise(|| ErrorKind::Io)?;
            if n == 0 {
                break;
            }
            hashed = hashed.saturating_add(n as u64);
            let chunk = &self.buf[..n];
            if let Some(h) = crc32.as_mut() {
                h.update(chunk);
            }
            if let Some(h) = md5.as_mut() {
                h.update(chunk);
            }
            if let Some(h) = sha1.as_mut() {
                h.update(chunk);
            }
            if let Some(h) = sha256.as_mut() {
                h.update(chunk);
            }
        }

        let digests = DigestSet {
            crc32: crc32.map(|h| format!("{:08x}", h.finalize())),
            md5: md5.map(|h| format!("{:032x}", h.finalize())),
            sha1: sha1.map(|h| format!("{:040x}", h.finalize())),
            sha256: sha256.map(|h| format!("{:064x}", h.finalize())),
        };
        Ok((digests, hashed))
    }

    /// Hash an in-memory payload. Mirrors [`digest`](Self::digest) for
    /// archive entries that were decompressed into memory.
    pub fn digest_bytes(&mut self, bytes: &[u8], want: AlgoSet) -> Result<DigestSet> {
        let (digests, _) = self.digest(std::io::Cursor::new(bytes), want, None)?;
        Ok(digests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{HeaderHit, HeaderTable};
    use std::io::Cursor;

    // Well-known digests of the ASCII string "abc".
    const ABC_CRC32: &str = "352441c2";
    const ABC_MD5: &str = "900150983cd24fb0d6963f7d28e17f72";
    const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn known_vectors() {
        let mut digester = Digester::new();
        let (digests, hashed) = digester.digest(Cursor::new(b"abc"), AlgoSet::ALL, None).unwrap();
        assert_eq!(hashed, 3);
        assert_eq!(digests.crc32.as_deref(), Some(ABC_CRC32));
        assert_eq!(digests.md5.as_deref(), Some(ABC_MD5));
        assert_eq!(digests.sha1.as_deref(), Some(ABC_SHA1));
        assert_eq!(digests.sha256.as_deref(), Some(ABC_SHA256));
    }

    #[test]
    fn only_requested_algorithms_are_computed() {
        let mut digester = Digester::new();
        let want = AlgoSet::default().with(crate::Algorithm::Sha1);
        let (digests, _) = digester.digest(Cursor::new(b"abc"), want, None).unwrap();
        assert!(digests.crc32.is_none());
        assert!(digests.md5.is_none());
        assert_eq!(digests.sha1.as_deref(), Some(ABC_SHA1));
        assert!(digests.sha256.is_none());
    }

    #[test]
    fn header_bytes_are_excluded() {
        let mut payload = vec![0xAA; 16];
        payload.extend_from_slice(b"abc");
        let hit = HeaderHit { rule: "nes".into(), skip: 16 };

        let mut digester = Digester::new();
        let (digests, hashed) =
            digester.digest(Cursor::new(&payload), AlgoSet::ALL, Some(&hit)).unwrap();
        assert_eq!(hashed, 3);
        assert_eq!(digests.sha1.as_deref(), Some(ABC_SHA1));
    }

    #[test]
    fn detected_nes_header_matches_bare_payload() {
        // A synthetic iNES file: 16-byte header then the payload "abc".
        let mut file = Vec::new();
        file.extend_from_slice(b"NES\x1a");
        file.extend_from_slice(&[0u8; 12]);
        file.extend_from_slice(b"abc");

        let hit = HeaderTable::builtin()
            .detect(std::path::Path::new("game.nes"), &file, file.len() as u64)
            .unwrap();

        let mut digester = Digester::new();
        let (headered, _) =
            digester.digest(Cursor::new(&file), AlgoSet::ALL, Some(&hit)).unwrap();
        let (bare, _) = digester.digest(Cursor::new(b"abc"), AlgoSet::ALL, None).unwrap();
        assert_eq!(headered, bare);
    }

    #[test]
    fn empty_stream_yields_empty_digests() {
        let mut digester = Digester::new();
        let (digests, hashed) =
            digester.digest(Cursor::new(Vec::new()), AlgoSet::ALL, None).unwrap();
        assert_eq!(hashed, 0);
        // CRC32 of nothing is zero; the hex is still eight digits wide.
        assert_eq!(digests.crc32.as_deref(), Some("00000000"));
        assert_eq!(digests.md5.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
    }

    #[test]
    fn skip_longer_than_stream_hashes_nothing() {
        let hit = HeaderHit { rule: "nes".into(), skip: 64 };
        let mut digester = Digester::new();
        let (digests, hashed) =
            digester.digest(Cursor::new(b"short"), AlgoSet::ALL, Some(&hit)).unwrap();
        assert_eq!(hashed, 0);
        assert_eq!(digests.md5.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
    }
}

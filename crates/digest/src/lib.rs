//! Streaming checksum computation for ROM payloads.
//!
//! This crate wraps the four checksum algorithms that catalog files publish
//! behind a single streaming [`Digester`]:
//!
//! - **Algorithm selection** via [`AlgoSet`] so a run only pays for the
//!   digests it can actually match against.
//! - **Single-pass hashing** — the input is read exactly once in fixed-size
//!   buffers and every requested hasher is updated in lock-step.
//! - **Header-aware skipping** — a detected [`HeaderHit`] excludes a known
//!   leading byte sequence from the hashable payload, so dumps that differ
//!   only by a copier header hash identically.
//!
//! Header knowledge is data, not code: see [`header::HeaderTable`] and the
//! embedded `headers.toml`.

pub mod error;
pub mod header;
mod stream;

pub use crate::header::{HeaderHit, HeaderTable};
pub use crate::stream::{Digester, BUFFER_SIZE};

use serde::Serialize;

/// A checksum algorithm, ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Algorithm {
    Crc32,
    Md5,
    Sha1,
    Sha256,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Crc32,
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha256,
    ];
}

/// The set of algorithms a [`Digester`] pass should compute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlgoSet {
    pub crc32: bool,
    pub md5: bool,
    pub sha1: bool,
    pub sha256: bool,
}

impl AlgoSet {
    /// Every supported algorithm: everything a catalog can publish, plus
    /// SHA-256 as the cache key.
    pub const ALL: AlgoSet = AlgoSet { crc32: true, md5: true, sha1: true, sha256: true };

    pub fn with(mut self, algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Crc32 => self.crc32 = true,
            Algorithm::Md5 => self.md5 = true,
            Algorithm::Sha1 => self.sha1 = true,
            Algorithm::Sha256 => self.sha256 = true,
        }
        self
    }

    pub fn contains(&self, algorithm: Algorithm) -> bool {
        match algorithm {
            Algorithm::Crc32 => self.crc32,
            Algorithm::Md5 => self.md5,
            Algorithm::Sha1 => self.sha1,
            Algorithm::Sha256 => self.sha256,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.crc32 || self.md5 || self.sha1 || self.sha256)
    }
}

/// Computed digests, lowercase hex. Any subset may be present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DigestSet {
    pub crc32: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

impl DigestSet {
    /// The strongest digest present, preferring SHA-1 for catalog lookups,
    /// then MD5, then SHA-256, then CRC32.
    ///
    /// SHA-1 ranks first here (not SHA-256) because it is the strongest
    /// digest most catalogs and lookup services actually index.
    pub fn strongest_for_lookup(&self) -> Option<(Algorithm, &str)> {
        if let Some(sha1) = self.sha1.as_deref() {
            return Some((Algorithm::Sha1, sha1));
        }
        if let Some(md5) = self.md5.as_deref() {
            return Some((Algorithm::Md5, md5));
        }
        if let Some(sha256) = self.sha256.as_deref() {
            return Some((Algorithm::Sha256, sha256));
        }
        self.crc32.as_deref().map(|crc| (Algorithm::Crc32, crc))
    }

    /// Merge digests computed elsewhere (e.g. a cache row) into this set
    /// without overwriting anything already present.
    pub fn fill_from(&mut self, other: &DigestSet) {
        if self.crc32.is_none() {
            self.crc32 = other.crc32.clone();
        }
        if self.md5.is_none() {
            self.md5 = other.md5.clone();
        }
        if self.sha1.is_none() {
            self.sha1 = other.sha1.clone();
        }
        if self.sha256.is_none() {
            self.sha256 = other.sha256.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algoset_all_contains_everything() {
        for algorithm in Algorithm::ALL {
            assert!(AlgoSet::ALL.contains(algorithm));
        }
        assert!(AlgoSet::default().is_empty());
    }

    #[test]
    fn strongest_prefers_sha1() {
        let set = DigestSet {
            crc32: Some("cbf43926".into()),
            md5: Some("ed076287532e86365e841e92bfc50d8c".into()),
            sha1: Some("2ef7bde608ce5404e97d5f042f95f89f1c232871".into()),
            sha256: Some("a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e".into()),
        };
        let (algorithm, _) = set.strongest_for_lookup().unwrap();
        assert_eq!(algorithm, Algorithm::Sha1);
    }

    #[test]
    fn fill_from_does_not_overwrite() {
        let mut set = DigestSet { crc32: Some("deadbeef".into()), ..DigestSet::default() };
        let other = DigestSet {
            crc32: Some("cafebabe".into()),
            sha1: Some("2ef7bde608ce5404e97d5f042f95f89f1c232871".into()),
            ..DigestSet::default()
        };
        set.fill_from(&other);
        assert_eq!(set.crc32.as_deref(), Some("deadbeef"));
        assert_eq!(set.sha1.as_deref(), Some("2ef7bde608ce5404e97d5f042f95f89f1c232871"));
    }
}

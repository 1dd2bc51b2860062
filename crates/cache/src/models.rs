use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use romsort_digest::DigestSet;
use std::path::PathBuf;
use time::UtcDateTime;

/// A cached digest computation: which content (by SHA-256), where it was
/// last seen, and every digest computed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRecord {
    /// SHA-256 of the hashable payload; the cache key.
    pub sha256: String,
    /// Path the content was last observed at. Informational only; content
    /// moving between paths does not invalidate the row.
    pub source: PathBuf,
    /// Size of the hashable payload in bytes.
    pub size: u64,
    pub digests: DigestSet,
    pub updated_at: UtcDateTime,
}

impl DigestRecord {
    pub fn new(source: impl Into<PathBuf>, size: u64, digests: DigestSet) -> Option<Self> {
        let sha256 = digests.sha256.clone()?;
        Some(Self {
            sha256,
            source: source.into(),
            size,
            digests,
            updated_at: UtcDateTime::now(),
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ChecksumRow {
    key: String,
    source: String,
    size: i64,
    crc32: Option<String>,
    md5: Option<String>,
    sha1: Option<String>,
    sha256: String,
    updated_at: i64,
}

impl TryFrom<&DigestRecord> for ChecksumRow {
    type Error = Error;
    fn try_from(record: &DigestRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            key: record.sha256.clone(),
            source: record.source.to_string_lossy().into_owned(),
            size: i64::try_from(record.size).or_raise(|| ErrorKind::InvalidData("size"))?,
            crc32: record.digests.crc32.clone(),
            md5: record.digests.md5.clone(),
            sha1: record.digests.sha1.clone(),
            sha256: record.sha256.clone(),
            updated_at: record.updated_at.unix_timestamp(),
        })
    }
}

impl TryFrom<ChecksumRow> for DigestRecord {
    type Error = Error;
    fn try_from(row: ChecksumRow) -> Result<Self, Self::Error> {
        Ok(Self {
            digests: DigestSet {
                crc32: row.crc32,
                md5: row.md5,
                sha1: row.sha1,
                sha256: Some(row.sha256.clone()),
            },
            sha256: row.sha256,
            source: PathBuf::from(row.source),
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("size"))?,
            updated_at: UtcDateTime::from_unix_timestamp(row.updated_at)
                .or_raise(|| ErrorKind::InvalidData("updated_at"))?,
        })
    }
}

impl ChecksumRow {
    pub(crate) fn bind_insert<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        query
            .bind(&self.key)
            .bind(&self.source)
            .bind(self.size)
            .bind(&self.crc32)
            .bind(&self.md5)
            .bind(&self.sha1)
            .bind(&self.sha256)
            .bind(self.updated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_digests() -> DigestSet {
        DigestSet {
            crc32: Some("cbf43926".into()),
            md5: None,
            sha1: Some("a9993e364706816aba3e25717850c26c9cd0d89d".into()),
            sha256: Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".into()),
        }
    }

    #[test]
    fn test_record_requires_sha256() {
        let mut digests = sample_digests();
        assert!(DigestRecord::new("a.bin", 3, digests.clone()).is_some());
        digests.sha256 = None;
        assert!(DigestRecord::new("a.bin", 3, digests).is_none());
    }

    #[test]
    fn test_row_roundtrip() {
        let record = DigestRecord::new("roms/a.bin", 3, sample_digests()).unwrap();
        let row = ChecksumRow::try_from(&record).unwrap();
        assert_eq!(row.key, record.sha256);
        let back = DigestRecord::try_from(row).unwrap();
        assert_eq!(back.digests, record.digests);
        assert_eq!(back.size, record.size);
        // Unix timestamps are whole seconds; sub-second precision is lost.
        assert_eq!(back.updated_at, record.updated_at.replace_nanosecond(0).unwrap());
    }
}

//! Repository for the checksum and enrichment tables.
//!
//! Both tables share the same key (payload SHA-256) and the same write
//! discipline: upserts are transactional per record and durable before the
//! call returns, and transient write failures (SQLITE_BUSY under load) are
//! retried a few times with jittered backoff before surfacing.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{ChecksumRow, DigestRecord};
use exn::ResultExt;
use sqlx::SqlitePool;
use std::future::Future;
use std::time::Duration;
use time::UtcDateTime;
use tracing::instrument;

const WRITE_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 50;

/// Repository over the cache's two content-keyed tables.
///
/// Cloning is cheap (the pool is shared). Concurrent readers are fine;
/// SQLite serializes the single writer and the busy timeout plus the retry
/// loop below absorb contention bursts from many hash workers finishing at
/// once.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /* ================ *\
    |  Checksums table   |
    \* ================ */

    /// Look up the digest set previously computed for a payload.
    pub async fn get_checksums(&self, sha256: &str) -> Result<Option<DigestRecord>> {
        let row: Option<ChecksumRow> =
            sqlx::query_as(include_str!("../queries/get_checksums.sql"))
                .bind(sha256)
                .fetch_optional(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(DigestRecord::try_from).transpose()
    }

    /// Upsert a digest record. `updated_at` only ever advances, and digests
    /// already stored are kept when the incoming record lacks them.
    #[instrument(skip_all, fields(key = %record.sha256))]
    pub async fn put_checksums(&self, record: &DigestRecord) -> Result<()> {
        let row = ChecksumRow::try_from(record)?;
        self.retrying(|| async {
            row.bind_insert(sqlx::query(include_str!("../queries/upsert_checksums.sql")))
                .execute(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            Ok(())
        })
        .await
    }

    /* ================= *\
    |  Enrichment table   |
    \* ================= */

    /// Fetch the raw payload a metadata service previously returned for a
    /// payload, if any.
    pub async fn get_enrichment(
        &self,
        sha256: &str,
        service: &str,
    ) -> Result<Option<serde_json::Value>> {
        let row: Option<(String,)> =
            sqlx::query_as(include_str!("../queries/get_enrichment.sql"))
                .bind(sha256)
                .bind(service)
                .fetch_optional(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(|(payload,)| {
            serde_json::from_str(&payload).or_raise(|| ErrorKind::InvalidData("payload"))
        })
        .transpose()
    }

    /// Store the raw payload a metadata service returned for a payload.
    #[instrument(skip_all, fields(key = sha256, service = service))]
    pub async fn put_enrichment(
        &self,
        sha256: &str,
        service: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let text =
            serde_json::to_string(payload).or_raise(|| ErrorKind::InvalidData("payload"))?;
        let now = UtcDateTime::now().unix_timestamp();
        self.retrying(|| async {
            sqlx::query(include_str!("../queries/upsert_enrichment.sql"))
                .bind(sha256)
                .bind(service)
                .bind(&text)
                .bind(now)
                .execute(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            Ok(())
        })
        .await
    }

    /// Run a write, retrying retryable failures with jittered backoff.
    async fn retrying<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 < WRITE_ATTEMPTS && e.current_value().is_retryable() => {
                    let delay = backoff_with_jitter(attempt);
                    tracing::debug!(attempt, ?delay, "cache write busy, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff with clock-derived jitter so parallel writers don't
/// retry in lockstep.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS << attempt;
    let jitter = u64::from(UtcDateTime::now().nanosecond()) % BACKOFF_BASE_MS;
    Duration::from_millis(base + jitter)
}

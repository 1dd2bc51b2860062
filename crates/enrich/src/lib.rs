//! Optional metadata enrichment for unmatched scan records.
//!
//! Two external services can attach advisory metadata to a record:
//!
//! - a **hash lookup** keyed by the record's strongest digest, and
//! - a **title lookup** keyed by a normalized title plus an optional
//!   platform slug, with a shrinking-keyword retry ladder.
//!
//! Both are injected as trait objects ([`HashLookup`], [`TitleLookup`]) so
//! tests can substitute deterministic fakes — and, crucially, so cache-only
//! runs can be *proven* to make no network call by injecting a client that
//! records every attempt.
//!
//! Enrichment never changes match decisions and never fails a run: network
//! and payload errors are logged, counted, and swallowed.

pub mod credentials;
pub mod error;
mod hash_lookup;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod title_lookup;

pub use crate::credentials::Credentials;
pub use crate::hash_lookup::{HashLookup, HttpHashLookup};
pub use crate::title_lookup::{HttpTitleLookup, TitleLookup, build_search_ladder};

use romsort_cache::Repository;
use romsort_digest::DigestSet;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Base delay for the exponential retry backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// How eagerly the title lookup runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TitleLookupMode {
    /// Query only when the hash lookup produced nothing.
    #[default]
    BestEffort,
    /// Query for every unmatched record.
    Always,
    Off,
}

/// Advisory metadata attached to one record, plus any diagnostics raised
/// while fetching it.
#[derive(Debug, Default)]
pub struct Enrichment {
    pub hash_payload: Option<Value>,
    pub title_payload: Option<Value>,
    /// Human-readable diagnostics (e.g. `CACHE-MISS (cache-only)`).
    pub diagnostics: Vec<String>,
}

/// Orchestrates cache-first lookups against the injected services.
pub struct Enricher {
    cache: Option<Repository>,
    cache_only: bool,
    hash: Option<Arc<dyn HashLookup>>,
    title: Option<Arc<dyn TitleLookup>>,
    title_mode: TitleLookupMode,
    max_retries: u32,
}

impl Enricher {
    pub fn new(cache: Option<Repository>, cache_only: bool) -> Enricher {
        Enricher {
            cache,
            cache_only,
            hash: None,
            title: None,
            title_mode: TitleLookupMode::default(),
            max_retries: 3,
        }
    }

    pub fn with_hash_lookup(mut self, client: Arc<dyn HashLookup>) -> Enricher {
        self.hash = Some(client);
        self
    }

    pub fn with_title_lookup(mut self, client: Arc<dyn TitleLookup>, mode: TitleLookupMode) -> Enricher {
        self.title = Some(client);
        self.title_mode = mode;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Enricher {
        self.max_retries = max_retries;
        self
    }

    /// Enrich one unmatched record.
    ///
    /// `sha256` keys the cache; `digests` feeds the hash lookup; `title`
    /// and `platform` feed the title lookup. Failures surface only as
    /// diagnostics on the returned [`Enrichment`].
    #[instrument(skip_all, fields(key = sha256))]
    pub async fn enrich(
        &self,
        sha256: &str,
        digests: &DigestSet,
        title: &str,
        platform: Option<&str>,
    ) -> Enrichment {
        let mut enrichment = Enrichment::default();

        if let Some(hash) = &self.hash {
            enrichment.hash_payload = self
                .lookup_cached(sha256, hash.service(), &mut enrichment.diagnostics, || async {
                    let Some((algorithm, digest)) = digests.strongest_for_lookup() else {
                        return Ok(None);
                    };
                    self.with_retries(|| hash.lookup(algorithm, digest)).await
                })
                .await;
        }

        let title_wanted = match self.title_mode {
            TitleLookupMode::Off => false,
            TitleLookupMode::Always => true,
            TitleLookupMode::BestEffort => enrichment.hash_payload.is_none(),
        };
        if title_wanted && let Some(client) = &self.title {
            enrichment.title_payload = self
                .lookup_cached(sha256, client.service(), &mut enrichment.diagnostics, || async {
                    self.with_retries(|| client.lookup(title, platform)).await
                })
                .await;
        }

        enrichment
    }

    /// Cache-first lookup: stored payload wins; otherwise fetch (unless
    /// cache-only) and store the result for the next run.
    async fn lookup_cached<F, Fut>(
        &self,
        sha256: &str,
        service: &'static str,
        diagnostics: &mut Vec<String>,
        fetch: F,
    ) -> Option<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = error::Result<Option<Value>>>,
    {
        if let Some(cache) = &self.cache {
            match cache.get_enrichment(sha256, service).await {
                Ok(Some(payload)) => return Some(payload),
                Ok(None) => {},
                Err(e) => tracing::warn!(service, error = %e.current_value(), "enrichment cache read failed"),
            }
        }

        if self.cache_only {
            diagnostics.push(format!("{service}: CACHE-MISS (cache-only)"));
            return None;
        }

        match fetch().await {
            Ok(Some(payload)) => {
                if let Some(cache) = &self.cache
                    && let Err(e) = cache.put_enrichment(sha256, service, &payload).await
                {
                    tracing::warn!(service, error = %e.current_value(), "enrichment cache write failed");
                }
                Some(payload)
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(service, error = %e.current_value(), "enrichment lookup failed");
                diagnostics.push(format!("{service}: lookup failed"));
                None
            },
        }
    }

    /// Run an operation with exponential backoff on retryable failures.
    async fn with_retries<F, Fut>(&self, op: F) -> error::Result<Option<Value>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = error::Result<Option<Value>>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < self.max_retries.max(1) && e.current_value().is_retryable() => {
                    let delay = BACKOFF_BASE * 2u32.saturating_pow(attempt);
                    tracing::debug!(attempt, ?delay, "lookup failed, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingHashLookup, RecordingTitleLookup};
    use romsort_cache::Database;

    fn digests() -> DigestSet {
        DigestSet {
            crc32: Some("cbf43926".into()),
            md5: None,
            sha1: Some("a9993e364706816aba3e25717850c26c9cd0d89d".into()),
            sha256: Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".into()),
        }
    }

    const KEY: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[tokio::test]
    async fn cache_only_never_touches_the_network() {
        let db = Database::connect_in_memory().await.unwrap();
        let hash = Arc::new(RecordingHashLookup::returning(serde_json::json!({"name": "Game"})));
        let title = Arc::new(RecordingTitleLookup::returning(serde_json::json!({"id": 1})));

        let enricher = Enricher::new(Some(Repository::from(&db)), true)
            .with_hash_lookup(hash.clone())
            .with_title_lookup(title.clone(), TitleLookupMode::Always);

        let result = enricher.enrich(KEY, &digests(), "Game A", Some("snes")).await;

        assert_eq!(hash.call_count(), 0, "cache-only must not call the hash service");
        assert_eq!(title.call_count(), 0, "cache-only must not call the title service");
        assert!(result.hash_payload.is_none());
        assert!(result.title_payload.is_none());
        assert!(result.diagnostics.iter().any(|d| d.contains("CACHE-MISS (cache-only)")));
    }

    #[tokio::test]
    async fn cache_only_still_serves_cached_payloads() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let payload = serde_json::json!({"name": "Cached Game"});
        repo.put_enrichment(KEY, "hash-lookup", &payload).await.unwrap();

        let hash = Arc::new(RecordingHashLookup::returning(serde_json::json!({"fresh": true})));
        let enricher =
            Enricher::new(Some(repo), true).with_hash_lookup(hash.clone());

        let result = enricher.enrich(KEY, &digests(), "Game A", None).await;
        assert_eq!(hash.call_count(), 0);
        assert_eq!(result.hash_payload, Some(payload));
        assert!(result.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn fetches_and_stores_on_cache_miss() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let payload = serde_json::json!({"name": "Fetched Game"});
        let hash = Arc::new(RecordingHashLookup::returning(payload.clone()));

        let enricher =
            Enricher::new(Some(repo.clone()), false).with_hash_lookup(hash.clone());
        let result = enricher.enrich(KEY, &digests(), "Game A", None).await;

        assert_eq!(hash.call_count(), 1);
        assert_eq!(result.hash_payload, Some(payload.clone()));
        // Stored for the next (possibly cache-only) run.
        assert_eq!(repo.get_enrichment(KEY, "hash-lookup").await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn best_effort_title_lookup_skips_when_hash_hit() {
        let db = Database::connect_in_memory().await.unwrap();
        let hash = Arc::new(RecordingHashLookup::returning(serde_json::json!({"hit": true})));
        let title = Arc::new(RecordingTitleLookup::returning(serde_json::json!({"id": 1})));

        let enricher = Enricher::new(Some(Repository::from(&db)), false)
            .with_hash_lookup(hash)
            .with_title_lookup(title.clone(), TitleLookupMode::BestEffort);

        let result = enricher.enrich(KEY, &digests(), "Game A", None).await;
        assert!(result.hash_payload.is_some());
        assert_eq!(title.call_count(), 0);
    }

    #[tokio::test]
    async fn failures_become_diagnostics_not_errors() {
        let hash = Arc::new(RecordingHashLookup::failing());
        let enricher = Enricher::new(None, false).with_hash_lookup(hash.clone()).with_max_retries(1);

        let result = enricher.enrich(KEY, &digests(), "Game A", None).await;
        assert!(result.hash_payload.is_none());
        assert!(result.diagnostics.iter().any(|d| d.contains("lookup failed")));
        assert_eq!(hash.call_count(), 1);
    }

    #[tokio::test]
    async fn retryable_failures_are_retried() {
        let hash = Arc::new(RecordingHashLookup::failing());
        let enricher = Enricher::new(None, false).with_hash_lookup(hash.clone()).with_max_retries(3);

        tokio::time::pause();
        let run = tokio::spawn(async move {
            enricher.enrich(KEY, &digests(), "Game A", None).await
        });
        // Paused time auto-advances through the backoff sleeps.
        let result = run.await.unwrap();
        assert!(result.hash_payload.is_none());
        assert_eq!(hash.call_count(), 3);
    }
}

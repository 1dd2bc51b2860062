//! Checksum-keyed metadata lookup.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use romsort_digest::Algorithm;
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

/// A service answering "what release has this digest?".
#[async_trait]
pub trait HashLookup: Send + Sync {
    /// Cache-table name for payloads from this service.
    fn service(&self) -> &'static str {
        "hash-lookup"
    }

    /// Query by digest. `Ok(None)` is a clean miss; errors are transport or
    /// payload problems the caller may retry.
    async fn lookup(&self, algorithm: Algorithm, digest: &str) -> Result<Option<Value>>;
}

/// HTTP implementation against a `Lookup/ByHash/{alg}/{digest}` endpoint.
pub struct HttpHashLookup {
    client: reqwest::Client,
    base: String,
}

impl HttpHashLookup {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<HttpHashLookup> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .or_raise(|| ErrorKind::Network)?;
        Ok(HttpHashLookup { client, base: base.into() })
    }

    fn algorithm_segment(algorithm: Algorithm) -> &'static str {
        match algorithm {
            Algorithm::Crc32 => "crc32",
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
        }
    }
}

#[async_trait]
impl HashLookup for HttpHashLookup {
    #[instrument(skip(self, digest), fields(algorithm = ?algorithm))]
    async fn lookup(&self, algorithm: Algorithm, digest: &str) -> Result<Option<Value>> {
        let url = format!(
            "{}/api/v1/Lookup/ByHash/{}/{digest}",
            self.base.trim_end_matches('/'),
            Self::algorithm_segment(algorithm),
        );
        let response = self.client.get(&url).send().await.or_raise(|| ErrorKind::Network)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            exn::bail!(ErrorKind::Network);
        }
        let payload: Value = response.json().await.or_raise(|| ErrorKind::Payload)?;
        Ok(Some(payload))
    }
}

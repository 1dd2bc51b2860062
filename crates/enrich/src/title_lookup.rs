//! Title-keyed metadata lookup with a shrinking-keyword retry ladder.
//!
//! Release filenames are noisy: tags, years, punctuation, platform
//! shorthand. The ladder starts from the most specific query and backs off
//! toward a single keyword:
//!
//! 1. normalized title with a platform filter (when a slug is known);
//! 2. normalized title alone;
//! 3. progressively shorter keyword phrases (dropping trailing words);
//! 4. the first keyword alone, for very short titles.
//!
//! The first rung that returns any result wins.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::instrument;

/// Service-side request budget: requests per window, window length, and the
/// in-flight ceiling.
const RATE_MAX_PER_WINDOW: u32 = 4;
const RATE_WINDOW: Duration = Duration::from_secs(1);
const RATE_MAX_INFLIGHT: usize = 8;

/// A service answering "what release is titled roughly this?".
#[async_trait]
pub trait TitleLookup: Send + Sync {
    /// Cache-table name for payloads from this service.
    fn service(&self) -> &'static str {
        "title-lookup"
    }

    /// Query by normalized title and optional platform slug.
    async fn lookup(&self, title: &str, platform: Option<&str>) -> Result<Option<Value>>;
}

/// One rung of the retry ladder: the search term and whether the platform
/// filter applies to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRung {
    pub term: String,
    pub with_platform: bool,
}

/// Build the search ladder for a raw title.
pub fn build_search_ladder(title: &str, platform: Option<&str>) -> Vec<SearchRung> {
    let normalized = normalize_query(title);
    let keywords: Vec<&str> = normalized.split_whitespace().collect();
    let mut ladder = Vec::new();

    if normalized.is_empty() {
        return ladder;
    }
    if platform.is_some() {
        ladder.push(SearchRung { term: normalized.clone(), with_platform: true });
    }
    ladder.push(SearchRung { term: normalized.clone(), with_platform: false });

    // Drop trailing words one at a time, down to two-word phrases.
    for take in (2..keywords.len()).rev() {
        ladder.push(SearchRung { term: keywords[..take].join(" "), with_platform: false });
    }
    // Single keyword only for titles short enough that it stays meaningful.
    if keywords.len() <= 2 && keywords.len() > 1 {
        ladder.push(SearchRung { term: keywords[0].to_string(), with_platform: false });
    }

    ladder
}

/// Strip tags, years, and punctuation noise from a filename-ish title.
fn normalize_query(title: &str) -> String {
    let bare = romsort_catalog_normalize(title);
    bare.split_whitespace()
        .filter(|word| !is_noise_word(word))
        .collect::<Vec<_>>()
        .join(" ")
}

// The catalog crate owns the canonical tag-stripping rules, but depending on
// it here would invert the crate layering for one small function. This is
// the same depth-walk, punctuation mapped to spaces.
fn romsort_catalog_normalize(title: &str) -> String {
    let mut clean = String::new();
    let mut depth = 0usize;
    let stem = title.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(title);
    for ch in stem.chars() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                if ch.is_alphanumeric() {
                    clean.push(ch);
                } else {
                    clean.push(' ');
                }
            },
            _ => {},
        }
    }
    clean
}

fn is_noise_word(word: &str) -> bool {
    // Standalone years and common dump-scene noise that survives
    // tag-stripping in flat filenames.
    if word.len() == 4 && word.chars().all(|c| c.is_ascii_digit()) {
        let year: u32 = word.parse().unwrap_or(0);
        return (1970..=2099).contains(&year);
    }
    matches!(word.to_ascii_lowercase().as_str(), "rom" | "roms" | "usa" | "eur" | "jpn")
}

struct RateState {
    window_start: Instant,
    requests_in_window: u32,
}

/// Async token bucket: N requests per window plus an in-flight ceiling.
struct RateLimiter {
    state: Mutex<RateState>,
    inflight: Semaphore,
}

impl RateLimiter {
    fn new() -> RateLimiter {
        RateLimiter {
            state: Mutex::new(RateState {
                window_start: Instant::now(),
                requests_in_window: 0,
            }),
            inflight: Semaphore::new(RATE_MAX_INFLIGHT),
        }
    }

    async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        // Semaphore is never closed, so acquire cannot fail.
        let permit = self.inflight.acquire().await.expect("semaphore closed");
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.window_start) >= RATE_WINDOW {
                    state.window_start = now;
                    state.requests_in_window = 0;
                }
                if state.requests_in_window < RATE_MAX_PER_WINDOW {
                    state.requests_in_window += 1;
                    return permit;
                }
                RATE_WINDOW - now.duration_since(state.window_start)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// HTTP implementation against a query-body search endpoint.
pub struct HttpTitleLookup {
    client: reqwest::Client,
    base: String,
    client_id: String,
    token: String,
    limiter: RateLimiter,
}

const QUERY_FIELDS: &str = "name,slug,summary,first_release_date,platforms.name,platforms.slug,genres.name";
const QUERY_LIMIT: usize = 20;

impl HttpTitleLookup {
    pub fn new(
        base: impl Into<String>,
        client_id: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<HttpTitleLookup> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .or_raise(|| ErrorKind::Network)?;
        Ok(HttpTitleLookup {
            client,
            base: base.into(),
            client_id: client_id.into(),
            token: token.into(),
            limiter: RateLimiter::new(),
        })
    }

    async fn query(&self, body: String) -> Result<Option<Value>> {
        let _permit = self.limiter.acquire().await;
        let url = format!("{}/v4/games", self.base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.token)
            .body(body)
            .send()
            .await
            .or_raise(|| ErrorKind::Network)?;
        if !response.status().is_success() {
            exn::bail!(ErrorKind::Network);
        }
        let payload: Value = response.json().await.or_raise(|| ErrorKind::Payload)?;
        match payload.as_array() {
            Some(results) if results.is_empty() => Ok(None),
            Some(_) => Ok(Some(payload)),
            None => exn::bail!(ErrorKind::Payload),
        }
    }
}

#[async_trait]
impl TitleLookup for HttpTitleLookup {
    #[instrument(skip(self))]
    async fn lookup(&self, title: &str, platform: Option<&str>) -> Result<Option<Value>> {
        for rung in build_search_ladder(title, platform) {
            let filter = match (rung.with_platform, platform) {
                (true, Some(slug)) => format!(" where platforms.slug = \"{slug}\";"),
                _ => String::new(),
            };
            let body = format!(
                "search \"{}\";{filter} fields {QUERY_FIELDS}; limit {QUERY_LIMIT};",
                rung.term,
            );
            if let Some(payload) = self.query(body).await? {
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_starts_specific_and_shrinks() {
        let ladder = build_search_ladder("Super Mario World 2 (USA).sfc", Some("snes"));
        assert!(ladder.len() >= 3);
        assert!(ladder[0].with_platform);
        assert_eq!(ladder[0].term, "Super Mario World 2");
        assert_eq!(ladder[1].term, "Super Mario World 2");
        assert!(!ladder[1].with_platform);
        // Shrinking phrases follow.
        assert_eq!(ladder[2].term, "Super Mario World");
        assert_eq!(ladder.last().unwrap().term, "Super Mario");
    }

    #[test]
    fn ladder_without_platform_skips_filter_rung() {
        let ladder = build_search_ladder("Tetris.gb", None);
        assert!(ladder.iter().all(|r| !r.with_platform));
        assert_eq!(ladder[0].term, "Tetris");
    }

    #[test]
    fn short_titles_fall_back_to_single_keyword() {
        let ladder = build_search_ladder("Metal Slug", None);
        assert_eq!(ladder.last().unwrap().term, "Metal");
    }

    #[test]
    fn normalization_drops_tags_years_and_punctuation() {
        let ladder = build_search_ladder("Legend_of-Zelda, The (1986) (Japan) [!].fds", None);
        assert_eq!(ladder[0].term, "Legend of Zelda The");
    }

    #[test]
    fn empty_title_yields_empty_ladder() {
        assert!(build_search_ladder("(USA).bin", None).is_empty());
    }
}

//! Content-fingerprinted parse result cache.
//!
//! Keys pair a normalized URL with the page's content hash; entries expire
//! on a TTL and are replaced wholesale, never merged. The cache is a
//! performance optimization only; staleness is bounded strictly by the TTL.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use pagepilot_core::ParseResult;

/// Cache key: normalized URL plus DOM content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub url: String,
    pub content_hash: String,
}

impl CacheKey {
    pub fn new(url: &str, content_hash: &str) -> Self {
        Self {
            url: normalize_url(url),
            content_hash: content_hash.to_string(),
        }
    }
}

/// Normalize a URL for cache keying: parsed form without fragment, host
/// lowercased by the parser. Unparseable input is used verbatim.
pub fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

struct CacheEntry {
    result: ParseResult,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// Shared, last-writer-wins result cache.
#[derive(Default)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a fresh entry; expired entries are removed on access.
    pub fn get(&self, key: &CacheKey) -> Option<ParseResult> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expired() => true,
            Some(entry) => return Some(entry.result.clone()),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Insert a result, replacing any existing entry for the key wholesale.
    pub fn set(&self, key: CacheKey, result: ParseResult, ttl: Duration) {
        debug!("Caching parse result for {}", key.url);
        self.entries.insert(
            key,
            CacheEntry {
                result,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove every entry whose URL starts with `prefix`; returns the count.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.url.starts_with(prefix));
        before - self.entries.len()
    }

    /// Drop expired entries; returns the count removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired());
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

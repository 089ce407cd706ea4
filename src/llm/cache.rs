//! In-memory reply cache with TTL and LRU eviction.
//!
//! Keyed by a SHA-256 hash of the conversation lines, persona and language.
//! Eviction happens inline on lookup and insert; there is no sweeper task.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::pipeline::types::ConversationContext;

/// How often (in lookups) to emit a cache statistics log line.
const STATS_LOG_EVERY_N: u64 = 100;

/// Configuration for the reply cache.
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// Time-to-live for cache entries.
    pub ttl: Duration,
    /// Maximum number of cached entries before LRU eviction.
    pub max_entries: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_entries: 256,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: String,
    created_at: Instant,
    last_accessed: Instant,
    hit_count: u64,
}

/// TTL + LRU reply cache. Not synchronized; the owner provides the lock.
#[derive(Debug)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    config: ResponseCacheConfig,
    lookups: u64,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            lookups: 0,
        }
    }

    /// Look up a fresh entry, dropping it if it has expired.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<String> {
        self.lookups += 1;
        let ttl = self.config.ttl;

        let hit = match self.entries.get_mut(key) {
            Some(entry) if now.saturating_duration_since(entry.created_at) < ttl => {
                entry.last_accessed = now;
                entry.hit_count += 1;
                tracing::debug!(hits = entry.hit_count, "reply cache hit");
                Some(entry.response.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        };

        self.maybe_log_stats();
        hit
    }

    /// Store a response, evicting expired entries and then the least
    /// recently used ones to stay within capacity.
    pub fn insert(&mut self, key: String, response: String, now: Instant) {
        let ttl = self.config.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.created_at) < ttl);

        while self.entries.len() >= self.config.max_entries.max(1) {
            let oldest_key = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| k.clone());

            match oldest_key {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                response,
                created_at: now,
                last_accessed: now,
                hit_count: 0,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total cache hits across live entries.
    pub fn total_hits(&self) -> u64 {
        self.entries.values().map(|e| e.hit_count).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn maybe_log_stats(&self) {
        if self.lookups % STATS_LOG_EVERY_N == 0 {
            let total_hits = self.total_hits();
            let hit_rate = total_hits as f64 / self.lookups as f64 * 100.0;
            tracing::info!(
                total_lookups = self.lookups,
                total_hits,
                hit_rate_pct = format!("{hit_rate:.1}"),
                entry_count = self.entries.len(),
                "Reply cache statistics"
            );
        }
    }
}

/// Deterministic cache key for a context.
///
/// Two contexts with the same lines, persona and language share a key.
pub fn cache_key(context: &ConversationContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.persona.as_bytes());
    hasher.update(b"|");
    hasher.update(context.language_hint.as_str().as_bytes());
    hasher.update(b"|");
    for line in &context.lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\x00");
    }
    format!("{:x}", hasher.finalize())
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bounded LRU cache with per-entry randomised TTL.
//!
//! Each shard is an [`lru::LruCache`] behind its own mutex, so concurrent
//! readers of different shards never contend.  TTLs are jittered per entry
//! (`base * (1 + U(-j, +j))`) so values written together do not all expire
//! in the same instant and stampede their producers.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use rand::Rng;

use weft_config::CacheConfig;

#[derive(Debug)]
struct Entry<V> {
    data: V,
    timestamp: Instant,
    hits: u64,
    size: usize,
    ttl: Duration,
}

/// Per-shard hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub hits: u64,
    pub misses: u64,
}

impl ShardStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// One bounded key-value shard.
pub struct TtlCache<V> {
    inner: Mutex<LruCache<String, Entry<V>>>,
    base_ttl: Duration,
    jitter: f64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, base_ttl: Duration, jitter: f64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            base_ttl,
            jitter,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Read a value.  A live hit promotes the entry to most-recently-used
    /// and increments its hit counter; an expired entry is evicted and
    /// counts as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let live = match inner.get_mut(key) {
            Some(entry) => {
                if entry.timestamp.elapsed() < entry.ttl {
                    entry.hits += 1;
                    true
                } else {
                    false
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if live {
            self.hits.fetch_add(1, Ordering::Relaxed);
            inner.get(key).map(|e| e.data.clone())
        } else {
            inner.pop(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert a value, evicting the least-recently-used entry when the shard
    /// is at capacity.  The entry's TTL is the jittered base TTL.
    pub fn set(&self, key: impl Into<String>, value: V, size: usize) {
        let ttl = self.jittered_ttl();
        let entry = Entry { data: value, timestamp: Instant::now(), hits: 0, size, ttl };
        self.inner.lock().unwrap().put(key.into(), entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().unwrap().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total declared size of live entries.
    pub fn total_size(&self) -> usize {
        self.inner.lock().unwrap().iter().map(|(_, e)| e.size).sum()
    }

    /// Snapshot of the live (non-expired) entries, most-recently-used first.
    /// Does not touch recency order or hit counters.
    pub fn entries(&self) -> Vec<(String, V)> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.timestamp.elapsed() < e.ttl)
            .map(|(k, e)| (k.clone(), e.data.clone()))
            .collect()
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn clear_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<String> = inner
            .iter()
            .filter(|(_, e)| e.timestamp.elapsed() >= e.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.pop(key);
        }
        expired.len()
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn jittered_ttl(&self) -> Duration {
        if self.jitter <= 0.0 {
            return self.base_ttl;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        self.base_ttl.mul_f64(factor.max(0.0))
    }

    #[cfg(test)]
    fn entry_ttl(&self, key: &str) -> Option<Duration> {
        self.inner.lock().unwrap().peek(key).map(|e| e.ttl)
    }

    #[cfg(test)]
    fn entry_hits(&self, key: &str) -> Option<u64> {
        self.inner.lock().unwrap().peek(key).map(|e| e.hits)
    }
}

// ─── Unified shard set ────────────────────────────────────────────────────────

/// Combined counters across all four shards.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub sections: ShardStats,
    pub contents: ShardStats,
    pub skills: ShardStats,
    pub parse_results: ShardStats,
}

impl CacheStats {
    pub fn combined_hit_rate(&self) -> f64 {
        let hits = self.sections.hits + self.contents.hits + self.skills.hits + self.parse_results.hits;
        let misses = self.sections.misses
            + self.contents.misses
            + self.skills.misses
            + self.parse_results.misses;
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// The four logical shards used by prompt assembly, each with its own
/// capacity and an independent lock.
pub struct ContextCache {
    pub sections: TtlCache<String>,
    pub contents: TtlCache<String>,
    pub skills: TtlCache<String>,
    pub parse_results: TtlCache<serde_json::Value>,
}

impl ContextCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(cfg.ttl_secs);
        Self {
            sections: TtlCache::new(cfg.max_sections, ttl, cfg.jitter),
            contents: TtlCache::new(cfg.max_contents, ttl, cfg.jitter),
            skills: TtlCache::new(cfg.max_skills, ttl, cfg.jitter),
            parse_results: TtlCache::new(cfg.max_parse_results, ttl, cfg.jitter),
        }
    }

    /// Periodic sweep over all shards; returns the number of entries dropped.
    pub fn clear_expired(&self) -> usize {
        self.sections.clear_expired()
            + self.contents.clear_expired()
            + self.skills.clear_expired()
            + self.parse_results.clear_expired()
    }

    pub fn clear(&self) {
        self.sections.clear();
        self.contents.clear();
        self.skills.clear();
        self.parse_results.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            sections: self.sections.stats(),
            contents: self.contents.stats(),
            skills: self.skills.stats(),
            parse_results: self.parse_results.stats(),
        }
    }
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

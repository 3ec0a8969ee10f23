//! Process-local cache tier.
//!
//! This is the tier the invalidation protocol keeps consistent across nodes:
//! every node has its own copy and nothing here is shared between processes.
//!
//! ## Clear predicate
//!
//! `remove_matching(type, data)` evicts every key accepted by the configured
//! [`ClearPredicate`]. The default [`default_clear_matcher`] understands:
//!
//! | type            | evicts                                   |
//! |-----------------|------------------------------------------|
//! | `""` / `All`    | every entry                              |
//! | `Prefix`        | keys starting with `data`                |
//! | anything else   | keys starting with `{type}_{data}` (type compared case-insensitively) |

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::value::CacheValue;

/// Capability set of the local tier consumed by the caching layer.
///
/// Implementations must be safe to share between request tasks and the
/// invalidation listener.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Get a value; expired entries read as absent.
    async fn get(&self, key: &str) -> Option<CacheValue>;

    /// Store a value. `None` means no expiry.
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>);

    /// Remove one key. Returns whether an entry was present.
    async fn remove_one(&self, key: &str) -> bool;

    /// Remove every entry matching the type/data discriminator.
    async fn remove_matching(&self, kind: &str, data: &str) -> usize;

    /// Get cache statistics for monitoring.
    fn stats(&self) -> LocalCacheStats;

    /// Drop expired entries. Default is a no-op for tiers with native TTL.
    fn cleanup_expired(&self) -> usize {
        0
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct LocalCacheStats {
    /// Number of entries currently in the cache.
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub evictions: u64,
    /// Entries dropped by `remove_one`/`remove_matching`.
    pub invalidations: u64,
}

impl LocalCacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Decides whether `key` is covered by a `Clear{type, data}` request.
pub type ClearPredicate = Arc<dyn Fn(&str, &str, &str) -> bool + Send + Sync>;

/// Default matcher, see the module docs.
pub fn default_clear_matcher(key: &str, kind: &str, data: &str) -> bool {
    if kind.is_empty() || kind.eq_ignore_ascii_case("all") {
        return true;
    }
    if kind.eq_ignore_ascii_case("prefix") {
        return key.starts_with(data);
    }

    let Some(rest) = key
        .get(..kind.len())
        .filter(|head| head.eq_ignore_ascii_case(kind))
        .map(|_| &key[kind.len()..])
    else {
        return false;
    };
    rest.strip_prefix('_')
        .is_some_and(|tail| tail.starts_with(data))
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory local tier backed by `DashMap`, with lazy TTL expiry.
pub struct DashMapLocalCache {
    entries: DashMap<String, LocalEntry>,
    matcher: ClearPredicate,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for DashMapLocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DashMapLocalCache {
    pub fn new() -> Self {
        Self::with_clear_predicate(Arc::new(default_clear_matcher))
    }

    /// Create a cache whose `remove_matching` uses a custom predicate.
    pub fn with_clear_predicate(matcher: ClearPredicate) -> Self {
        Self {
            entries: DashMap::new(),
            matcher,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }

        removed
    }
}

#[async_trait]
impl LocalCache for DashMapLocalCache {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            // Entry expired, remove it
            drop(entry);
            self.entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) {
        let entry = LocalEntry {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        };
        self.entries.insert(key.to_string(), entry);
    }

    async fn remove_one(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    async fn remove_matching(&self, kind: &str, data: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            if (self.matcher)(key, kind, data) {
                removed += 1;
                false
            } else {
                true
            }
        });

        self.invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        tracing::debug!(kind = %kind, data = %data, removed, "local entries cleared");
        removed
    }

    fn stats(&self) -> LocalCacheStats {
        LocalCacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    fn cleanup_expired(&self) -> usize {
        self.sweep_expired()
    }
}

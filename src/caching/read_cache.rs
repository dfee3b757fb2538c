//! # Read Cache
//!
//! Short-TTL cache for catalog reads keyed by canonical query keys. It absorbs
//! bursts of identical requests inside a narrow replay window; a longer-lived,
//! stale-while-revalidate edge cache sits in front of it, so this layer only
//! has to bridge the gap until the edge engages.

use super::stores::TtlMap;
use crate::core::config::ReadCacheConfig;
use crate::core::sweeper::Sweep;
use crate::observability::metrics::READ_CACHE_LOOKUPS;
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Response header telling callers whether the read cache served them
pub const APP_CACHE_HEADER: &str = "x-app-cache";

/// Read-through cache with a fixed TTL.
///
/// `clear()` bumps a generation counter. A writer that captured the
/// generation before running its query stores through `set_if_current`, so a
/// result computed against pre-clear data never lands after the clear.
pub struct ReadCache<V> {
    store: TtlMap<String, V>,
    ttl: Duration,
    generation: AtomicU64,
}

impl<V> ReadCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &ReadCacheConfig) -> Self {
        Self::with_ttl(config.ttl, config.max_entries)
    }

    pub fn with_ttl(ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: TtlMap::new(max_entries),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    /// Look up a live entry
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let value = self.store.get_at(&key.to_string(), now);
        let result = if value.is_some() { "hit" } else { "miss" };
        counter!(READ_CACHE_LOOKUPS, "result" => result).increment(1);
        debug!(key, result, "Read cache lookup");
        value
    }

    /// Store a value under the configured TTL, replacing any previous entry
    pub fn set(&self, key: &str, value: V) {
        self.set_at(key, value, Instant::now());
    }

    fn set_at(&self, key: &str, value: V, now: Instant) {
        let outcome = self.store.insert_at(key.to_string(), value, self.ttl, now);
        if outcome.evicted {
            debug!(key, "Read cache full, evicted oldest entry");
        }
    }

    /// Current invalidation generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` only if no clear happened since `generation` was read.
    /// Returns whether the entry was kept.
    pub fn set_if_current(&self, key: &str, value: V, generation: u64) -> bool {
        self.set_if_current_at(key, value, generation, Instant::now())
    }

    fn set_if_current_at(&self, key: &str, value: V, generation: u64, now: Instant) -> bool {
        if self.generation() != generation {
            debug!(key, "Read cache cleared during query, result not stored");
            return false;
        }
        self.set_at(key, value, now);

        // A clear racing the insert above has already bumped the counter
        if self.generation() != generation {
            self.store.remove(&key.to_string());
            debug!(key, "Read cache cleared during insert, entry dropped");
            return false;
        }
        true
    }

    /// Drop every cached entry and start a new generation
    pub fn clear(&self) -> usize {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = self.store.clear();
        debug!(removed, "Read cache cleared");
        removed
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Purge expired entries
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired_at(Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        let counters = self.store.counters();
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            entries: self.store.len(),
            max_entries: self.store.max_entries(),
            ttl_ms: self.ttl.as_millis() as u64,
            hits,
            misses,
            hit_ratio: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            evictions: counters.evictions.load(Ordering::Relaxed),
            expired_cleanups: counters.expired.load(Ordering::Relaxed),
        }
    }
}

impl<V> Sweep for ReadCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn sweep_name(&self) -> &'static str {
        "read_cache"
    }

    fn sweep(&self) -> usize {
        self.purge_expired()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_ms: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub evictions: u64,
    pub expired_cleanups: u64,
}

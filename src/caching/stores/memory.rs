//! # In-Memory TTL Store
//!
//! Bounded map with per-entry expiry, shared by the read cache and the
//! idempotency store.
//!
//! - Lazy expiry: an expired entry is removed when it is read.
//! - Periodic expiry: `purge_expired` drops everything past its deadline.
//! - Bounded: inserting a new key into a full map evicts the single
//!   oldest-inserted live entry (FIFO, not LRU).
//!
//! Insertion order is tracked with a queue of `(key, sequence)` pairs. An
//! entry removed by expiry leaves its queue slot behind; the slot is skipped
//! when it reaches the front because its sequence no longer matches.

use super::CacheEntry;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Outcome of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// An older entry was evicted to make room
    pub evicted: bool,
}

struct Slot<V> {
    entry: CacheEntry<V>,
    seq: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Slot<V>>,
    order: VecDeque<(K, u64)>,
    next_seq: u64,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn evict_oldest(&mut self) -> bool {
        while let Some((key, seq)) = self.order.pop_front() {
            let live = self.entries.get(&key).map(|slot| slot.seq == seq).unwrap_or(false);
            if live {
                self.entries.remove(&key);
                return true;
            }
        }
        false
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).map(|slot| slot.seq == *seq).unwrap_or(false));
    }
}

/// Counters kept by a store
#[derive(Debug, Default)]
pub struct StoreCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expired: AtomicU64,
}

/// Bounded TTL map
pub struct TtlMap<K, V> {
    inner: Mutex<Inner<K, V>>,
    max_entries: usize,
    counters: StoreCounters,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
            max_entries: max_entries.max(1),
            counters: StoreCounters::default(),
        }
    }

    /// Read a live value, removing it if it has expired
    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(slot) => slot.entry.is_expired_at(now),
        };

        if expired {
            inner.entries.remove(key);
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        inner.entries.get(key).map(|slot| slot.entry.value.clone())
    }

    /// Insert or replace a value. A replaced key counts as freshly inserted.
    pub fn insert_at(&self, key: K, value: V, ttl: Duration, now: Instant) -> InsertOutcome {
        let mut inner = self.inner.lock();
        let mut evicted = false;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            evicted = inner.evict_oldest();
            if evicted {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((key.clone(), seq));
        inner.entries.insert(
            key,
            Slot {
                entry: CacheEntry::new(value, ttl, now),
                seq,
            },
        );

        // Replacements leave dead slots behind; keep the queue from growing
        // without bound between sweeps.
        if inner.order.len() > self.max_entries.saturating_mul(2) {
            inner.compact_order();
        }

        InsertOutcome { evicted }
    }

    /// Remove a key, returning whether it was present
    pub fn remove(&self, key: &K) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Drop every entry past its deadline
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, slot| !slot.entry.is_expired_at(now));
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.compact_order();
            self.counters.expired.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Drop everything
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the key is present, expired or not
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }
}

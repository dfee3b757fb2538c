//! # Cache Stores Module
//!
//! Storage primitives for the in-process caches. Everything here is
//! synchronous and process-local.

pub mod memory;

pub use memory::{InsertOutcome, StoreCounters, TtlMap};

use std::time::{Duration, Instant};

/// Cached value with its deadline
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,

    /// When the entry was stored
    pub created_at: Instant,

    /// Past this instant the entry must not be served
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Expired strictly after the deadline
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before expiry
    pub fn ttl_remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

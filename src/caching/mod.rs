//! # Caching Module
//!
//! In-process caches that sit in front of the storefront handlers:
//!
//! - [`read_cache`]: short-TTL cache for catalog reads under canonical keys
//! - [`deduplication`]: idempotency store replaying mutation results
//! - [`cdn`]: edge cache-status detection and normalization
//!
//! Both stores are built on the bounded [`stores::TtlMap`] and are swept
//! periodically by the background sweeper.

pub mod cdn;
pub mod deduplication;
pub mod key_generator;
pub mod read_cache;
pub mod stores;

pub use cdn::{detect, CacheStatus, CdnInfo, CdnProvider};
pub use deduplication::{IdempotencyRecord, IdempotencyStats, IdempotencyStore, MemoizedResponse};
pub use key_generator::{canonicalize, canonicalize_query, scoped_key, EMPTY_QUERY_KEY};
pub use read_cache::{CacheStats, ReadCache};
pub use stores::{CacheEntry, TtlMap};

//! # Idempotency Module
//!
//! Memoizes mutation responses so a client retrying with the same
//! idempotency key gets the original result instead of a second side effect.
//!
//! Records are keyed by `(client key, scope)`. The scope names the resource
//! being mutated (`returns:1001`, `admin-product:RNG-001`), so two unrelated
//! resources never collide on the same client-chosen key.
//!
//! Requests without a key execute every time. Callers of operations that are
//! unsafe to repeat are expected to always send one.

use super::stores::TtlMap;
use crate::core::config::IdempotencyConfig;
use crate::core::sweeper::Sweep;
use crate::observability::metrics::IDEMPOTENCY_REPLAYS;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Header set on replayed responses
pub const REPLAY_HEADER: &str = "x-idempotency-replay";

/// Composite record key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub key: String,
    pub scope: String,
}

impl IdempotencyKey {
    pub fn new(key: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            scope: scope.into(),
        }
    }
}

/// A memoized mutation result
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub scope: String,
    pub status: StatusCode,
    pub body: Bytes,
    pub expires_at: Instant,
}

/// Response produced by an idempotent execution
#[derive(Debug, Clone, PartialEq)]
pub struct MemoizedResponse {
    pub status: StatusCode,
    pub body: Bytes,
    /// The body came from a stored record, not a fresh execution
    pub replayed: bool,
}

impl IntoResponse for MemoizedResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if self.replayed {
            headers.insert(REPLAY_HEADER, HeaderValue::from_static("true"));
        }
        response
    }
}

/// Process-local idempotency store
pub struct IdempotencyStore {
    records: TtlMap<IdempotencyKey, IdempotencyRecord>,
    default_ttl: Duration,
    header_name: String,
    store_server_errors: bool,
}

impl IdempotencyStore {
    pub fn new(config: &IdempotencyConfig) -> Self {
        Self {
            records: TtlMap::new(config.max_entries),
            default_ttl: config.ttl,
            header_name: config.header_name.to_ascii_lowercase(),
            store_server_errors: config.store_server_errors,
        }
    }

    /// Fetch a live record for `(key, scope)`
    pub fn get(&self, key: &str, scope: &str) -> Option<IdempotencyRecord> {
        self.get_at(key, scope, Instant::now())
    }

    fn get_at(&self, key: &str, scope: &str, now: Instant) -> Option<IdempotencyRecord> {
        self.records.get_at(&IdempotencyKey::new(key, scope), now)
    }

    /// Store a result under `(key, scope)`
    pub fn put(&self, key: &str, scope: &str, status: StatusCode, body: Bytes, ttl: Duration) {
        self.put_at(key, scope, status, body, ttl, Instant::now());
    }

    fn put_at(
        &self,
        key: &str,
        scope: &str,
        status: StatusCode,
        body: Bytes,
        ttl: Duration,
        now: Instant,
    ) {
        let record = IdempotencyRecord {
            key: key.to_string(),
            scope: scope.to_string(),
            status,
            body,
            expires_at: now + ttl,
        };
        self.records
            .insert_at(IdempotencyKey::new(key, scope), record, ttl, now);
    }

    /// Extract the client key from request headers. Blank values count as absent.
    pub fn key_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.header_name.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Whether a fresh result with this status should be memoized
    fn should_store(&self, status: StatusCode) -> bool {
        self.store_server_errors || !status.is_server_error()
    }

    /// Run `operation` at most once per `(key, scope)` within the TTL.
    ///
    /// With a key and a live record, the stored status and body are replayed
    /// and `operation` is not called. Otherwise `operation` runs and, if a key
    /// was supplied, its result is stored once it completes.
    ///
    /// No lock is held while `operation` runs, so two first requests racing
    /// on the same key can both execute; the later result wins the slot.
    pub async fn execute<F, Fut>(&self, key: Option<&str>, scope: &str, operation: F) -> MemoizedResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (StatusCode, Bytes)>,
    {
        let Some(key) = key else {
            let (status, body) = operation().await;
            return MemoizedResponse {
                status,
                body,
                replayed: false,
            };
        };

        if let Some(record) = self.get(key, scope) {
            counter!(IDEMPOTENCY_REPLAYS, "scope_kind" => scope_kind(scope)).increment(1);
            info!(scope, status = record.status.as_u16(), "Replaying idempotent response");
            return MemoizedResponse {
                status: record.status,
                body: record.body,
                replayed: true,
            };
        }

        let (status, body) = operation().await;

        if self.should_store(status) {
            self.put(key, scope, status, body.clone(), self.default_ttl);
            debug!(scope, status = status.as_u16(), "Stored idempotent response");
        } else {
            debug!(scope, status = status.as_u16(), "Server error not memoized");
        }

        MemoizedResponse {
            status,
            body,
            replayed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        self.records.purge_expired_at(Instant::now())
    }

    pub fn stats(&self) -> IdempotencyStats {
        let counters = self.records.counters();
        IdempotencyStats {
            records: self.records.len(),
            max_records: self.records.max_entries(),
            ttl_secs: self.default_ttl.as_secs(),
            replays: counters.hits.load(Ordering::Relaxed),
            first_seen: counters.misses.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            expired_cleanups: counters.expired.load(Ordering::Relaxed),
        }
    }
}

/// The resource kind part of a scope (`returns:1001` -> `returns`), used as a
/// low-cardinality metric label
fn scope_kind(scope: &str) -> String {
    scope.split(':').next().unwrap_or(scope).to_string()
}

impl Sweep for IdempotencyStore {
    fn sweep_name(&self) -> &'static str {
        "idempotency"
    }

    fn sweep(&self) -> usize {
        self.purge_expired()
    }
}

/// Idempotency statistics
#[derive(Debug, Clone, Serialize)]
pub struct IdempotencyStats {
    pub records: usize,
    pub max_records: usize,
    pub ttl_secs: u64,
    pub replays: u64,
    pub first_seen: u64,
    pub evictions: u64,
    pub expired_cleanups: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(&IdempotencyConfig::default())
    }

    #[test]
    fn test_scopes_never_collide() {
        let store = store();
        let ttl = Duration::from_secs(60);
        store.put("client-key", "sku-A", StatusCode::OK, Bytes::from_static(b"A"), ttl);
        store.put("client-key", "sku-B", StatusCode::CREATED, Bytes::from_static(b"B"), ttl);

        let a = store.get("client-key", "sku-A").unwrap();
        let b = store.get("client-key", "sku-B").unwrap();
        assert_eq!(a.body, Bytes::from_static(b"A"));
        assert_eq!(a.status, StatusCode::OK);
        assert_eq!(b.body, Bytes::from_static(b"B"));
        assert!(store.get("client-key", "sku-C").is_none());
    }

    #[test]
    fn test_record_expires_after_ttl() {
        let store = store();
        let now = Instant::now();
        store.put_at("k", "s", StatusCode::OK, Bytes::new(), Duration::from_secs(10), now);

        assert!(store.get_at("k", "s", now + Duration::from_secs(10)).is_some());
        assert!(store.get_at("k", "s", now + Duration::from_secs(11)).is_none());
    }

    #[tokio::test]
    async fn test_replay_skips_operation() {
        let store = store();
        let calls = AtomicUsize::new(0);
        let run = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            (StatusCode::CREATED, Bytes::from_static(b"{\"returnId\":\"R-1\"}"))
        };

        let first = store.execute(Some("abc"), "returns:1001", run).await;
        let second = store.execute(Some("abc"), "returns:1001", run).await;

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.status, second.status);
        assert_eq!(first.body, second.body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_key_executes_every_time() {
        let store = store();
        let calls = AtomicUsize::new(0);
        let run = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            (StatusCode::OK, Bytes::new())
        };

        store.execute(None, "csat:1001", run).await;
        store.execute(None, "csat:1001", run).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_client_errors_are_replayed_server_errors_are_not() {
        let store = store();

        store
            .execute(Some("k1"), "admin-product:NOPE", || async {
                (StatusCode::NOT_FOUND, Bytes::from_static(b"missing"))
            })
            .await;
        assert!(store.get("k1", "admin-product:NOPE").is_some());

        store
            .execute(Some("k2"), "returns:1002", || async {
                (StatusCode::BAD_GATEWAY, Bytes::from_static(b"down"))
            })
            .await;
        assert!(store.get("k2", "returns:1002").is_none());
    }

    #[tokio::test]
    async fn test_server_errors_replayed_when_configured() {
        let store = IdempotencyStore::new(&IdempotencyConfig {
            store_server_errors: true,
            ..Default::default()
        });

        store
            .execute(Some("k"), "returns:1003", || async {
                (StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(b"boom"))
            })
            .await;
        let replay = store
            .execute(Some("k"), "returns:1003", || async { (StatusCode::CREATED, Bytes::new()) })
            .await;

        assert!(replay.replayed);
        assert_eq!(replay.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_key_from_headers() {
        let store = store();
        let mut headers = HeaderMap::new();
        assert_eq!(store.key_from_headers(&headers), None);

        headers.insert("idempotency-key", HeaderValue::from_static("  "));
        assert_eq!(store.key_from_headers(&headers), None);

        headers.insert("Idempotency-Key", HeaderValue::from_static("req-42"));
        assert_eq!(store.key_from_headers(&headers), Some("req-42".to_string()));
    }

    #[test]
    fn test_replay_response_headers() {
        let response = MemoizedResponse {
            status: StatusCode::CREATED,
            body: Bytes::from_static(b"{}"),
            replayed: true,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get(REPLAY_HEADER).unwrap(), "true");
    }

    #[test]
    fn test_scope_kind() {
        assert_eq!(scope_kind("returns:1001"), "returns");
        assert_eq!(scope_kind("plain"), "plain");
    }
}

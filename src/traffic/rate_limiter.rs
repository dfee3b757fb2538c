//! # Token Bucket Rate Limiting
//!
//! Per-identity admission control. Each identity (client IP or similar) owns a
//! bucket holding a fractional token balance that refills continuously at
//! `refill_rate` tokens per second up to `max_tokens`. An admitted call debits
//! `cost` tokens, so an expensive endpoint can charge more per call than a
//! cheap one and exhaust the burst faster.
//!
//! Buckets live in a `DashMap`; the entry API holds the shard lock for the
//! whole refill-and-debit step, so concurrent checks on the same identity never
//! interleave. Denial is an ordinary result, never an error.
//!
//! ## Usage Example
//! ```rust
//! use storefront_shield::core::config::BucketPolicy;
//! use storefront_shield::traffic::TokenBucketLimiter;
//!
//! let limiter = TokenBucketLimiter::new("catalog", BucketPolicy::new(5.0, 1.0));
//! let decision = limiter.check("203.0.113.7");
//! assert!(decision.allowed);
//! ```

use crate::core::config::{BucketPolicy, RateLimitConfig};
use crate::core::error::{ShieldError, ShieldResult};
use crate::core::sweeper::Sweep;
use crate::observability::metrics::RATE_LIMIT_DECISIONS;
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Token balance for one identity
#[derive(Debug, Clone, Copy)]
pub struct Bucket {
    pub tokens: f64,
    pub last_refill_at: Instant,
}

impl Bucket {
    fn full(policy: &BucketPolicy, now: Instant) -> Self {
        Self {
            tokens: policy.max_tokens,
            last_refill_at: now,
        }
    }

    /// `now` is read before the shard lock, so a racing caller may arrive
    /// with an older instant; the refill clock only moves forward.
    fn refill(&mut self, policy: &BucketPolicy, now: Instant) {
        let now = now.max(self.last_refill_at);
        let elapsed = now.duration_since(self.last_refill_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * policy.refill_rate).min(policy.max_tokens);
        self.last_refill_at = now;
    }
}

/// Admission decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole tokens left after this call
    pub remaining: u32,
    /// Seconds until enough tokens accrue, present on denial
    pub retry_after_secs: Option<u64>,
}

/// Token bucket limiter for one named policy
pub struct TokenBucketLimiter {
    name: String,
    policy: BucketPolicy,
    buckets: DashMap<String, Bucket>,
    idle_ttl: Duration,
    allowed: AtomicU64,
    denied: AtomicU64,
}

impl TokenBucketLimiter {
    pub fn new(name: impl Into<String>, policy: BucketPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            buckets: DashMap::new(),
            idle_ttl: Duration::from_secs(600),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    /// Set how long a bucket may sit untouched before the sweep drops it
    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &BucketPolicy {
        &self.policy
    }

    /// Check and debit the bucket for `identity`
    pub fn check(&self, identity: &str) -> RateLimitDecision {
        self.check_at(identity, Instant::now())
    }

    fn check_at(&self, identity: &str, now: Instant) -> RateLimitDecision {
        let policy = self.policy;

        let decision = {
            let mut bucket = self
                .buckets
                .entry(identity.to_string())
                .or_insert_with(|| Bucket::full(&policy, now));

            bucket.refill(&policy, now);

            if bucket.tokens >= policy.cost {
                bucket.tokens -= policy.cost;
                RateLimitDecision {
                    allowed: true,
                    remaining: bucket.tokens.floor() as u32,
                    retry_after_secs: None,
                }
            } else {
                let deficit = policy.cost - bucket.tokens;
                RateLimitDecision {
                    allowed: false,
                    remaining: bucket.tokens.floor() as u32,
                    retry_after_secs: Some((deficit / policy.refill_rate).ceil() as u64),
                }
            }
        };

        if decision.allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
            counter!(RATE_LIMIT_DECISIONS, "policy" => self.name.clone(), "outcome" => "allowed")
                .increment(1);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
            counter!(RATE_LIMIT_DECISIONS, "policy" => self.name.clone(), "outcome" => "denied")
                .increment(1);
            debug!(
                policy = %self.name,
                identity,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit denied"
            );
        }

        decision
    }

    /// Current token balance for an identity, without refilling or debiting
    pub fn tokens(&self, identity: &str) -> Option<f64> {
        self.buckets.get(identity).map(|bucket| bucket.tokens)
    }

    /// Drop buckets idle for longer than the staleness window
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    fn purge_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let idle_ttl = self.idle_ttl;
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill_at) <= idle_ttl);
        before.saturating_sub(self.buckets.len())
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            policy: self.name.clone(),
            max_tokens: self.policy.max_tokens,
            refill_rate: self.policy.refill_rate,
            cost: self.policy.cost,
            tracked_identities: self.buckets.len(),
            requests_allowed: self.allowed.load(Ordering::Relaxed),
            requests_denied: self.denied.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one limiter's counters
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub policy: String,
    pub max_tokens: f64,
    pub refill_rate: f64,
    pub cost: f64,
    pub tracked_identities: usize,
    pub requests_allowed: u64,
    pub requests_denied: u64,
}

/// Named limiters, one per configured policy
pub struct RateLimiterRegistry {
    limiters: HashMap<String, Arc<TokenBucketLimiter>>,
}

impl RateLimiterRegistry {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let limiters = config
            .policies
            .iter()
            .map(|(name, policy)| {
                let limiter = TokenBucketLimiter::new(name.clone(), *policy)
                    .with_idle_ttl(config.bucket_idle_ttl);
                (name.clone(), Arc::new(limiter))
            })
            .collect();

        Self { limiters }
    }

    /// Look up a policy by name
    pub fn policy(&self, name: &str) -> ShieldResult<Arc<TokenBucketLimiter>> {
        self.limiters
            .get(name)
            .cloned()
            .ok_or_else(|| ShieldError::config(format!("rate limit policy '{}' is not configured", name)))
    }

    pub fn stats(&self) -> Vec<LimiterStats> {
        let mut stats: Vec<_> = self.limiters.values().map(|l| l.stats()).collect();
        stats.sort_by(|a, b| a.policy.cmp(&b.policy));
        stats
    }
}

impl Sweep for RateLimiterRegistry {
    fn sweep_name(&self) -> &'static str {
        "rate_limit_buckets"
    }

    fn sweep(&self) -> usize {
        let mut removed = 0;
        for limiter in self.limiters.values() {
            let purged = limiter.purge_idle();
            if purged > 0 {
                debug!(policy = %limiter.name, purged, "Purged idle buckets");
            }
            removed += purged;
        }
        if removed > 10_000 {
            warn!(removed, "Large idle bucket purge; consider a shorter bucket_idle_ttl");
        }
        removed
    }
}

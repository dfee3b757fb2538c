//! # Traffic Management
//!
//! Admission control for the HTTP surface. Each route group is guarded by a
//! named token bucket policy; see [`rate_limiter`].

pub mod rate_limiter;

pub use rate_limiter::{
    Bucket, LimiterStats, RateLimitDecision, RateLimiterRegistry, TokenBucketLimiter,
};

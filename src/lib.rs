//! # storefront-shield
//!
//! A resilience layer for a product-catalog API. It sits in the request path
//! of an axum service and provides:
//!
//! - token bucket admission control per client identity and route group
//! - a short-TTL read cache keyed by the canonical form of the query
//! - idempotent replay of mutation responses keyed by `Idempotency-Key`
//! - normalization of CDN cache headers across edge vendors
//! - latency monitoring against a fixed budget with alerts and percentiles
//!
//! All state is in-process. Running several instances behind a balancer
//! gives each instance its own buckets, caches and idempotency records.

/// Error type, configuration and background sweeping
pub mod core;

/// Token bucket rate limiting
pub mod traffic;

/// Read cache, idempotency store and CDN header normalization
pub mod caching;

/// Logging setup, Prometheus export and the performance monitor
pub mod observability;

/// axum middleware wiring the components into the request path
pub mod middleware;

/// Product catalog and mutation endpoints
pub mod catalog;

/// Performance reports on the admin listener
pub mod admin;

/// Router assembly and server lifecycle
pub mod gateway;

pub use core::config::ShieldConfig;
pub use core::error::{ShieldError, ShieldResult};
pub use gateway::server::{AppState, Shield};

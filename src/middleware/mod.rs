//! # Middleware Module
//!
//! axum middleware functions wiring the resilience components into the
//! request path. Applied outermost first: CDN annotation, performance
//! timing, then the per-route-group rate limiter.

pub mod cdn;
pub mod performance;
pub mod rate_limiting;

pub use cdn::annotate_cdn_status;
pub use performance::track_performance;
pub use rate_limiting::{client_identity, enforce_rate_limit, RateLimitGate};

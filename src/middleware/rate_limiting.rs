//! # Rate Limiting Middleware
//!
//! Admission gate in front of a route group. Each group is layered with its
//! own [`TokenBucketLimiter`], which is how a route selects its policy.
//!
//! Forwarded-address headers are honored only when
//! `rate_limits.trust_forwarded_headers` is set, which assumes a proxy in
//! front that overwrites them.

use crate::core::error::ShieldError;
use crate::traffic::rate_limiter::TokenBucketLimiter;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Identity used when nothing identifies the caller
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Resolve the caller identity.
///
/// With `trust_forwarded` set: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the peer address. Those headers are client-controlled
/// unless a proxy in front rewrites them, so without it only the peer
/// address counts.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if trust_forwarded {
        if let Some(ip) = header("x-forwarded-for")
            .and_then(|forwarded| forwarded.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return ip.to_string();
        }

        if let Some(ip) = header("x-real-ip") {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string())
}

/// Middleware state: the route group's limiter and how callers are identified
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<TokenBucketLimiter>,
    trust_forwarded_headers: bool,
}

impl RateLimitGate {
    pub fn new(limiter: Arc<TokenBucketLimiter>, trust_forwarded_headers: bool) -> Self {
        Self {
            limiter,
            trust_forwarded_headers,
        }
    }
}

/// Check the bucket for the caller and either forward or answer 429
pub async fn enforce_rate_limit(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = &gate.limiter;
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer, gate.trust_forwarded_headers);
    let decision = limiter.check(&identity);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
        warn!(
            policy = limiter.name(),
            identity = %identity,
            path = request.uri().path(),
            retry_after_secs,
            "Request rejected by rate limiter"
        );
        ShieldError::RateLimitExceeded {
            policy: limiter.name().to_string(),
            retry_after_secs,
        }
        .into_response()
    };

    response.headers_mut().insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(decision.remaining),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BucketPolicy;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_identity_resolution_order() {
        let peer: SocketAddr = "10.0.0.9:5123".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, None, true), ANONYMOUS_IDENTITY);
        assert_eq!(client_identity(&headers, Some(peer), true), "10.0.0.9");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_identity(&headers, Some(peer), true), "198.51.100.4");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 70.41.3.18, 150.172.238.178"),
        );
        assert_eq!(client_identity(&headers, Some(peer), true), "203.0.113.7");
    }

    #[test]
    fn test_untrusted_headers_are_ignored() {
        let peer: SocketAddr = "10.0.0.9:5123".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));

        assert_eq!(client_identity(&headers, Some(peer), false), "10.0.0.9");
        assert_eq!(client_identity(&headers, None, false), ANONYMOUS_IDENTITY);
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_shares_a_bucket_when_untrusted() {
        let limiter = Arc::new(TokenBucketLimiter::new("test", BucketPolicy::new(1.0, 0.5)));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(
                RateLimitGate::new(limiter, false),
                enforce_rate_limit,
            ));

        let request = |forwarded: &'static str| {
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", forwarded)
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request("203.0.113.7")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let spoofed = app.oneshot(request("203.0.113.8")).await.unwrap();
        assert_eq!(spoofed.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_denied_request_gets_429_with_retry_after() {
        let limiter = Arc::new(TokenBucketLimiter::new("test", BucketPolicy::new(1.0, 0.5)));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(
                RateLimitGate::new(limiter, true),
                enforce_rate_limit,
            ));

        let request = || {
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers().get(RATE_LIMIT_REMAINING_HEADER).unwrap(), "0");

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers().get("retry-after").unwrap(), "2");
        assert_eq!(second.headers().get(RATE_LIMIT_REMAINING_HEADER).unwrap(), "0");
    }
}

//! # Performance Middleware
//!
//! Times every request through the [`PerformanceMonitor`] and stamps the
//! response with `X-Response-Time` and `X-Performance-Tier`. The endpoint
//! label is the matched route template so metrics do not fan out per SKU.

use crate::caching::read_cache::APP_CACHE_HEADER;
use crate::observability::performance::{CacheOutcome, PerformanceMonitor};
use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub const RESPONSE_TIME_HEADER: &str = "x-response-time";
pub const PERFORMANCE_TIER_HEADER: &str = "x-performance-tier";

fn classify(response: &Response) -> (u16, CacheOutcome) {
    let cache_status = CacheOutcome::from_header(
        response
            .headers()
            .get(APP_CACHE_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    (response.status().as_u16(), cache_status)
}

pub async fn track_performance(
    State(monitor): State<Arc<PerformanceMonitor>>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let method = request.method().to_string();

    let handler = AssertUnwindSafe(next.run(request)).catch_unwind();
    let (outcome, timing) = monitor.measure(&endpoint, &method, handler, classify).await;

    // A panicking handler has been recorded as a 500 bypass
    let mut response = match outcome {
        Ok(response) => response,
        Err(panic) => std::panic::resume_unwind(panic),
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", timing.elapsed.as_millis())) {
        headers.insert(RESPONSE_TIME_HEADER, value);
    }
    headers.insert(PERFORMANCE_TIER_HEADER, HeaderValue::from_static(timing.tier.as_str()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PerformanceConfig;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_response_is_stamped_and_recorded() {
        let monitor = Arc::new(PerformanceMonitor::new(PerformanceConfig::default()));
        let app = Router::new()
            .route(
                "/items/:id",
                get(|| async { ([(APP_CACHE_HEADER, "HIT")], "cached") }),
            )
            .layer(middleware::from_fn_with_state(monitor.clone(), track_performance));

        let response = app
            .oneshot(Request::builder().uri("/items/42").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(RESPONSE_TIME_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("ms"));
        assert_eq!(response.headers().get(PERFORMANCE_TIER_HEADER).unwrap(), "optimal");

        let stats = monitor.stats(None);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.cache_hit_ratio, 1.0);
        assert_eq!(stats.slowest_endpoints[0].endpoint, "/items/:id");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_recorded_then_resumed() {
        let monitor = Arc::new(PerformanceMonitor::new(PerformanceConfig::default()));
        let app = Router::new()
            .route("/boom", get(|| async { panic!("handler failed") as () }))
            .layer(middleware::from_fn_with_state(monitor.clone(), track_performance));

        let request = Request::builder().uri("/boom").body(Body::empty()).unwrap();
        let outcome = AssertUnwindSafe(app.oneshot(request)).catch_unwind().await;
        assert!(outcome.is_err());

        let stats = monitor.stats(None);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.cache_hit_ratio, 0.0);
        assert_eq!(stats.slowest_endpoints[0].endpoint, "/boom");
    }
}

//! Decorates responses with the edge cache status seen on the request.

use crate::caching::cdn::detect;
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::debug;

pub const CDN_CACHE_HEADER: &str = "x-cdn-cache";

/// Adds `X-CDN-Cache: PROVIDER:STATUS(raw)` when an edge network is detected
pub async fn annotate_cdn_status(request: Request, next: Next) -> Response {
    let info = detect(request.headers());
    let mut response = next.run(request).await;

    if info.is_detected() {
        let diagnostic = info.diagnostic();
        debug!(cdn = %diagnostic, "Edge cache status");
        if let Ok(value) = HeaderValue::from_str(&diagnostic) {
            response.headers_mut().insert(CDN_CACHE_HEADER, value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(annotate_cdn_status))
    }

    #[tokio::test]
    async fn test_header_added_when_edge_detected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-vercel-cache", "HIT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(CDN_CACHE_HEADER).unwrap(), "VERCEL:HIT(HIT)");
    }

    #[tokio::test]
    async fn test_header_omitted_without_edge() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().get(CDN_CACHE_HEADER).is_none());
    }
}

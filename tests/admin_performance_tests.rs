//! # Admin Performance API Tests
//!
//! Drives traffic through the public router, then reads the reports served
//! by the admin router over the same shared state.

use axum_test::TestServer;
use http::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use storefront_shield::catalog::{InMemoryCatalog, InMemoryMutations};
use storefront_shield::core::config::{BucketPolicy, POLICY_ADMIN};
use storefront_shield::{Shield, ShieldConfig};

fn create_servers(config: ShieldConfig, catalog: InMemoryCatalog) -> (TestServer, TestServer) {
    let shield = Shield::with_backends(
        config,
        Arc::new(catalog),
        Arc::new(InMemoryMutations::seeded()),
    )
    .unwrap();

    let public = TestServer::new(shield.router().unwrap()).unwrap();
    let admin = TestServer::new(shield.admin_router().unwrap()).unwrap();
    (public, admin)
}

#[tokio::test]
async fn test_stats_reflect_public_traffic() {
    let (public, admin) = create_servers(ShieldConfig::default(), InMemoryCatalog::seeded());

    public.get("/api/products?category=ring").await;
    public.get("/api/products?category=ring").await;
    public.get("/api/products?category=bracelet").await;

    let response = admin.get("/admin/performance/stats").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    let performance = &body["performance"];
    assert_eq!(performance["totalRequests"], 3);
    assert_eq!(performance["withinBudget"], 3);

    // One hit out of three timed catalog calls
    let ratio = performance["cacheHitRatio"].as_f64().unwrap();
    assert!((ratio - 1.0 / 3.0).abs() < 1e-9);

    assert_eq!(body["readCache"]["hits"], 1);
    assert_eq!(body["readCache"]["misses"], 2);
    assert!(body["idempotency"].is_object());
    assert!(body["rateLimits"].is_array());
    assert!(body["uptimeSecs"].is_u64());
}

#[tokio::test]
async fn test_slow_backend_raises_alerts_and_misses_compliance() {
    let catalog = InMemoryCatalog::seeded().with_latency(Duration::from_millis(320));
    let (public, admin) = create_servers(ShieldConfig::default(), catalog);

    let response = public.get("/api/products?category=necklace").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.headers().get("x-performance-tier").unwrap(), "critical");

    let alerts = admin.get("/admin/performance/alerts?limit=10").await;
    assert_eq!(alerts.status_code(), StatusCode::OK);
    let alerts: Value = alerts.json();
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["severity"], "critical");
    assert_eq!(alerts[0]["endpoint"], "/api/products");

    let report = admin.get("/admin/performance/compliance").await;
    assert_eq!(report.status_code(), StatusCode::OK);
    let report: Value = report.json();
    assert_eq!(report["complianceRate"], 0.0);
    assert_eq!(report["meetsTarget"], false);
    assert!(!report["recommendations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_zero_window_is_rejected() {
    let (_, admin) = create_servers(ShieldConfig::default(), InMemoryCatalog::seeded());

    let response = admin
        .get("/admin/performance/stats?windowMs=0")
        .expect_failure()
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = admin.get("/admin/performance/stats?windowMs=60000").await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_reports_are_rate_limited() {
    let mut config = ShieldConfig::default();
    config
        .rate_limits
        .policies
        .insert(POLICY_ADMIN.to_string(), BucketPolicy::new(1.0, 0.1));
    let (_, admin) = create_servers(config, InMemoryCatalog::seeded());

    let first = admin.get("/admin/performance/alerts").await;
    assert_eq!(first.status_code(), StatusCode::OK);

    let second = admin
        .get("/admin/performance/alerts")
        .expect_failure()
        .await;
    assert_eq!(second.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers().get("retry-after").unwrap(), "10");

    // Health stays reachable outside the admin policy
    let health = admin.get("/health").await;
    assert_eq!(health.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_without_recorder_is_not_found() {
    let (_, admin) = create_servers(ShieldConfig::default(), InMemoryCatalog::seeded());

    let response = admin.get("/metrics").expect_failure().await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

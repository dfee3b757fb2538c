//! # Idempotent Mutation Tests
//!
//! Replays, scope separation and validation behavior of the mutation
//! endpoints through the full public router.

use axum_test::TestServer;
use http::{HeaderName, HeaderValue, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use storefront_shield::catalog::{InMemoryCatalog, InMemoryMutations};
use storefront_shield::{Shield, ShieldConfig};

struct Harness {
    server: TestServer,
    catalog: Arc<InMemoryCatalog>,
    mutations: Arc<InMemoryMutations>,
}

fn create_harness() -> Harness {
    let catalog = Arc::new(InMemoryCatalog::seeded());
    let mutations = Arc::new(InMemoryMutations::seeded());
    let shield = Shield::with_backends(
        ShieldConfig::default(),
        catalog.clone(),
        mutations.clone(),
    )
    .unwrap();

    Harness {
        server: TestServer::new(shield.router().unwrap()).unwrap(),
        catalog,
        mutations,
    }
}

fn idempotency_key(value: &'static str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("idempotency-key"),
        HeaderValue::from_static(value),
    )
}

fn return_request(order_number: &str) -> Value {
    json!({
        "orderNumber": order_number,
        "email": "client@example.com",
        "skus": ["RNG-001"],
        "reason": "Wrong size",
    })
}

#[tokio::test]
async fn test_retried_return_is_replayed() {
    let h = create_harness();
    let (name, value) = idempotency_key("return-1001-a");

    let first = h
        .server
        .post("/api/returns")
        .add_header(name.clone(), value.clone())
        .json(&return_request("1001"))
        .await;
    assert_eq!(first.status_code(), StatusCode::CREATED);
    assert!(first.headers().get("x-idempotency-replay").is_none());

    let retry = h
        .server
        .post("/api/returns")
        .add_header(name, value)
        .json(&return_request("1001"))
        .await;
    assert_eq!(retry.status_code(), StatusCode::CREATED);
    assert_eq!(retry.headers().get("x-idempotency-replay").unwrap(), "true");
    assert_eq!(first.as_bytes(), retry.as_bytes());

    assert_eq!(h.mutations.executions(), 1);
}

#[tokio::test]
async fn test_requests_without_key_always_execute() {
    let h = create_harness();

    for _ in 0..2 {
        let response = h
            .server
            .post("/api/returns")
            .json(&return_request("1002"))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        assert!(response.headers().get("x-idempotency-replay").is_none());
    }

    assert_eq!(h.mutations.executions(), 2);
}

#[tokio::test]
async fn test_same_key_in_different_scopes_does_not_collide() {
    let h = create_harness();
    let (name, value) = idempotency_key("shared-key");

    for order in ["1003", "1004"] {
        let response = h
            .server
            .post("/api/order-updates/subscribe")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "orderNumber": order, "email": "client@example.com" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        assert!(response.headers().get("x-idempotency-replay").is_none());

        let body: Value = response.json();
        assert_eq!(body["reference"], order);
    }

    assert_eq!(h.mutations.executions(), 2);
}

#[tokio::test]
async fn test_validation_failure_is_not_memoized() {
    let h = create_harness();
    let (name, value) = idempotency_key("csat-1005");

    let rejected = h
        .server
        .post("/api/csat")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "orderNumber": "1005", "score": 9 }))
        .expect_failure()
        .await;
    assert_eq!(rejected.status_code(), StatusCode::BAD_REQUEST);

    let corrected = h
        .server
        .post("/api/csat")
        .add_header(name, value)
        .json(&json!({ "orderNumber": "1005", "score": 5, "comment": "Lovely" }))
        .await;
    assert_eq!(corrected.status_code(), StatusCode::CREATED);
    assert!(corrected.headers().get("x-idempotency-replay").is_none());
    assert_eq!(h.mutations.executions(), 1);
}

#[tokio::test]
async fn test_client_errors_from_the_backend_are_replayed() {
    let h = create_harness();
    let (name, value) = idempotency_key("return-unknown");

    let first = h
        .server
        .post("/api/returns")
        .add_header(name.clone(), value.clone())
        .json(&return_request("9999"))
        .expect_failure()
        .await;
    assert_eq!(first.status_code(), StatusCode::NOT_FOUND);

    let retry = h
        .server
        .post("/api/returns")
        .add_header(name, value)
        .json(&return_request("9999"))
        .expect_failure()
        .await;
    assert_eq!(retry.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(retry.headers().get("x-idempotency-replay").unwrap(), "true");
    assert_eq!(first.as_bytes(), retry.as_bytes());
}

#[tokio::test]
async fn test_stylist_handoff_scope_ignores_email_case() {
    let h = create_harness();
    let (name, value) = idempotency_key("stylist-1");

    let first = h
        .server
        .post("/api/stylist-handoff")
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "email": "Client@Example.com",
            "name": "Avery",
            "message": "Looking for a pendant",
        }))
        .await;
    assert_eq!(first.status_code(), StatusCode::ACCEPTED);

    let retry = h
        .server
        .post("/api/stylist-handoff")
        .add_header(name, value)
        .json(&json!({
            "email": "client@example.com",
            "name": "Avery",
            "message": "Looking for a pendant",
        }))
        .await;
    assert_eq!(retry.status_code(), StatusCode::ACCEPTED);
    assert_eq!(retry.headers().get("x-idempotency-replay").unwrap(), "true");
    assert_eq!(h.mutations.executions(), 1);
}

#[tokio::test]
async fn test_admin_edit_invalidates_catalog_reads() {
    let h = create_harness();

    let before = h.server.get("/api/products?category=ring").await;
    assert_eq!(before.headers().get("x-app-cache").unwrap(), "MISS");
    let cached = h.server.get("/api/products?category=ring").await;
    assert_eq!(cached.headers().get("x-app-cache").unwrap(), "HIT");

    let (name, value) = idempotency_key("edit-rng-001");
    let edit = h
        .server
        .put("/api/admin/products/RNG-001")
        .add_header(name, value)
        .json(&json!({ "price": 2600.0 }))
        .await;
    assert_eq!(edit.status_code(), StatusCode::OK);
    let product: Value = edit.json();
    assert_eq!(product["price"], 2600.0);

    let after = h.server.get("/api/products?category=ring").await;
    assert_eq!(after.headers().get("x-app-cache").unwrap(), "MISS");

    let body: Value = after.json();
    let edited = body["products"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["sku"] == "RNG-001")
        .unwrap();
    assert_eq!(edited["price"], 2600.0);

    // Two searches, one update
    assert_eq!(h.catalog.queries(), 3);
}

#[tokio::test]
async fn test_timed_out_admin_edit_is_not_memoized() {
    let mut config = ShieldConfig::default();
    config.server.backend_timeout = Duration::from_millis(50);
    let catalog = Arc::new(InMemoryCatalog::seeded().with_latency(Duration::from_millis(250)));
    let shield = Shield::with_backends(
        config,
        catalog.clone(),
        Arc::new(InMemoryMutations::seeded()),
    )
    .unwrap();
    let server = TestServer::new(shield.router().unwrap()).unwrap();
    let (name, value) = idempotency_key("edit-slow");

    for _ in 0..2 {
        let response = server
            .put("/api/admin/products/RNG-002")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "readyToShip": true }))
            .expect_failure()
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get("x-idempotency-replay").is_none());
    }

    // Both attempts reached the catalog; the 502 was never replayed
    assert_eq!(catalog.queries(), 2);
}

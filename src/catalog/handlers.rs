//! # Catalog Read Handlers
//!
//! `GET /api/products` is the hot read path. Responses are cached as
//! serialized bytes under the canonical form of the query string, so a hit
//! returns exactly the body the miss produced. A miss whose query overlapped
//! an admin edit is answered but not cached.

use super::backend::{call_with_deadline, ProductQuery, CATALOG_BACKEND, MAX_LIMIT};
use crate::caching::key_generator::{canonicalize_query, scoped_key};
use crate::caching::read_cache::APP_CACHE_HEADER;
use crate::core::error::{ShieldError, ShieldResult};
use crate::gateway::server::AppState;
use axum::{
    extract::{Query, RawQuery, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const PRODUCTS_ROUTE: &str = "/api/products";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductListResponse<T> {
    count: usize,
    products: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct BulkLookupRequest {
    pub skus: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkLookupResponse<T> {
    products: Vec<T>,
    missing: Vec<String>,
}

fn json_bytes(body: Bytes, cache_status: &'static str) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(APP_CACHE_HEADER, HeaderValue::from_static(cache_status));
    response
}

pub async fn list_products(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    Query(query): Query<ProductQuery>,
) -> ShieldResult<Response> {
    query.validate()?;

    let key = scoped_key(PRODUCTS_ROUTE, &canonicalize_query(raw.as_deref()));
    if let Some(body) = state.read_cache.get(&key) {
        return Ok(json_bytes(body, "HIT"));
    }

    let generation = state.read_cache.generation();
    let deadline = state.config.server.backend_timeout;
    let products = call_with_deadline(CATALOG_BACKEND, deadline, state.catalog.search(&query)).await?;
    debug!(key = %key, count = products.len(), "Catalog query executed");

    let body = serde_json::to_vec(&ProductListResponse {
        count: products.len(),
        products,
    })
    .map(Bytes::from)
    .map_err(|e| ShieldError::internal(format!("Failed to encode product list: {}", e)))?;
    state.read_cache.set_if_current(&key, body.clone(), generation);

    Ok(json_bytes(body, "MISS"))
}

pub async fn bulk_lookup(
    State(state): State<AppState>,
    Json(request): Json<BulkLookupRequest>,
) -> ShieldResult<impl IntoResponse> {
    if request.skus.is_empty() {
        return Err(ShieldError::validation("skus", "must not be empty"));
    }
    if request.skus.len() > MAX_LIMIT {
        return Err(ShieldError::validation(
            "skus",
            format!("at most {} SKUs per request", MAX_LIMIT),
        ));
    }

    let deadline = state.config.server.backend_timeout;
    let products =
        call_with_deadline(CATALOG_BACKEND, deadline, state.catalog.lookup(&request.skus)).await?;
    let missing = request
        .skus
        .iter()
        .filter(|sku| !products.iter().any(|p| &p.sku == *sku))
        .cloned()
        .collect();

    Ok(Json(BulkLookupResponse { products, missing }))
}

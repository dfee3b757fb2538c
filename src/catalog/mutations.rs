//! # Mutation Handlers
//!
//! Every mutation is validated first, then run through the idempotency store
//! under a scope naming the resource it touches. A rejected request never
//! reaches the store, so fixing the payload and retrying with the same key
//! executes normally.

use super::backend::{
    call_with_deadline, CsatRequest, OrderUpdatesRequest, ProductUpdate, ReturnRequest,
    StylistHandoffRequest, CATALOG_BACKEND, MUTATION_BACKEND,
};
use crate::caching::deduplication::MemoizedResponse;
use crate::core::error::{ShieldError, ShieldResult};
use crate::gateway::server::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use tracing::{error, info};

const MAX_MESSAGE_LEN: usize = 2000;
const MAX_COMMENT_LEN: usize = 1000;

/// Encode a backend outcome as the `(status, body)` pair the store memoizes
fn encode<T: Serialize>(success: StatusCode, outcome: ShieldResult<T>) -> (StatusCode, Bytes) {
    let encoded = outcome.and_then(|value| {
        serde_json::to_vec(&value)
            .map_err(|e| ShieldError::internal(format!("Failed to encode response: {}", e)))
    });
    match encoded {
        Ok(body) => (success, Bytes::from(body)),
        Err(err) => {
            if err.status_code().is_server_error() {
                error!(error = %err, "Mutation failed");
            }
            (err.status_code(), Bytes::from(err.to_json().to_string()))
        }
    }
}

async fn run_idempotent<T, Fut>(
    state: &AppState,
    headers: &HeaderMap,
    backend: &'static str,
    scope: String,
    success: StatusCode,
    operation: Fut,
) -> MemoizedResponse
where
    T: Serialize,
    Fut: Future<Output = ShieldResult<T>>,
{
    let key = state.idempotency.key_from_headers(headers);
    let deadline = state.config.server.backend_timeout;
    state
        .idempotency
        .execute(key.as_deref(), &scope, || async move {
            encode(success, call_with_deadline(backend, deadline, operation).await)
        })
        .await
}

fn require(field: &str, value: &str) -> ShieldResult<()> {
    if value.trim().is_empty() {
        Err(ShieldError::validation(field, "is required"))
    } else {
        Ok(())
    }
}

fn require_email(value: &str) -> ShieldResult<()> {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ShieldError::validation("email", "must be a valid email address")),
    }
}

fn require_order_number(value: &str) -> ShieldResult<()> {
    require("orderNumber", value)?;
    if value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        Ok(())
    } else {
        Err(ShieldError::validation("orderNumber", "may only contain letters, digits and dashes"))
    }
}

pub async fn create_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReturnRequest>,
) -> ShieldResult<MemoizedResponse> {
    require_order_number(&request.order_number)?;
    require_email(&request.email)?;
    require("reason", &request.reason)?;
    if request.skus.is_empty() {
        return Err(ShieldError::validation("skus", "at least one item is required"));
    }

    let scope = format!("returns:{}", request.order_number);
    let backend = state.mutations.clone();
    Ok(run_idempotent(&state, &headers, MUTATION_BACKEND, scope, StatusCode::CREATED, async move {
        backend.create_return(&request).await
    })
    .await)
}

pub async fn stylist_handoff(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StylistHandoffRequest>,
) -> ShieldResult<MemoizedResponse> {
    require_email(&request.email)?;
    require("name", &request.name)?;
    require("message", &request.message)?;
    if request.message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ShieldError::validation(
            "message",
            format!("must be at most {} characters", MAX_MESSAGE_LEN),
        ));
    }

    let scope = format!("stylist:{}", request.email.trim().to_ascii_lowercase());
    let backend = state.mutations.clone();
    Ok(run_idempotent(&state, &headers, MUTATION_BACKEND, scope, StatusCode::ACCEPTED, async move {
        backend.stylist_handoff(&request).await
    })
    .await)
}

pub async fn submit_csat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CsatRequest>,
) -> ShieldResult<MemoizedResponse> {
    require_order_number(&request.order_number)?;
    if !(1..=5).contains(&request.score) {
        return Err(ShieldError::validation("score", "must be between 1 and 5"));
    }
    if request
        .comment
        .as_ref()
        .map_or(false, |c| c.chars().count() > MAX_COMMENT_LEN)
    {
        return Err(ShieldError::validation(
            "comment",
            format!("must be at most {} characters", MAX_COMMENT_LEN),
        ));
    }

    let scope = format!("csat:{}", request.order_number);
    let backend = state.mutations.clone();
    Ok(run_idempotent(&state, &headers, MUTATION_BACKEND, scope, StatusCode::CREATED, async move {
        backend.submit_csat(&request).await
    })
    .await)
}

pub async fn subscribe_order_updates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OrderUpdatesRequest>,
) -> ShieldResult<MemoizedResponse> {
    require_order_number(&request.order_number)?;
    require_email(&request.email)?;

    let scope = format!("order-updates:{}", request.order_number);
    let backend = state.mutations.clone();
    Ok(run_idempotent(&state, &headers, MUTATION_BACKEND, scope, StatusCode::CREATED, async move {
        backend.subscribe_order_updates(&request).await
    })
    .await)
}

/// Admin product edit. A successful edit clears the read cache so catalog
/// reads stop serving the old product.
pub async fn update_product(
    State(state): State<AppState>,
    Path(sku): Path<String>,
    headers: HeaderMap,
    Json(update): Json<ProductUpdate>,
) -> ShieldResult<MemoizedResponse> {
    require("sku", &sku)?;
    if update == ProductUpdate::default() {
        return Err(ShieldError::validation("body", "no fields to update"));
    }
    if let Some(name) = &update.name {
        require("name", name)?;
    }
    if update.price.map_or(false, |p| !p.is_finite() || p <= 0.0) {
        return Err(ShieldError::validation("price", "must be greater than 0"));
    }

    let scope = format!("admin-product:{}", sku);
    let catalog = state.catalog.clone();
    let read_cache = state.read_cache.clone();
    Ok(run_idempotent(&state, &headers, CATALOG_BACKEND, scope, StatusCode::OK, async move {
        let product = catalog.update_product(&sku, &update).await?;
        let cleared = read_cache.clear();
        info!(sku = %sku, cleared, "Product updated, read cache cleared");
        Ok::<_, ShieldError>(product)
    })
    .await)
}

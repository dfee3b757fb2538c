//! # Catalog Backends
//!
//! The business systems behind the resilience layer, reached through two
//! traits so the layer can be exercised without real stores:
//!
//! - [`CatalogBackend`]: product search, bulk lookup and admin edits
//! - [`MutationBackend`]: returns, stylist handoff, CSAT and order-update
//!   subscriptions
//!
//! The in-memory implementations count their executions. Tests use the
//! counters to prove that cached reads and idempotent replays never reach
//! the backend.

use crate::core::error::{ShieldError, ShieldResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Default page size for product searches
pub const DEFAULT_LIMIT: usize = 24;

/// Upper bound on page size and bulk lookups
pub const MAX_LIMIT: usize = 100;

/// Backend names used in upstream failures
pub const CATALOG_BACKEND: &str = "catalog";
pub const MUTATION_BACKEND: &str = "mutations";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub category: String,
    pub metal: String,
    pub price: f64,
    pub ready_to_ship: bool,
    pub updated_at: DateTime<Utc>,
}

/// Filters accepted by `GET /api/products`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    pub category: Option<String>,
    pub ready_to_ship: Option<bool>,
    pub metal: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub sort: Option<ProductSort>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    PriceAsc,
    PriceDesc,
    Name,
    Newest,
}

impl ProductQuery {
    pub fn validate(&self) -> ShieldResult<()> {
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(ShieldError::validation("minPrice", "must not exceed maxPrice"));
            }
        }
        if self.min_price.map_or(false, |p| p < 0.0) || self.max_price.map_or(false, |p| p < 0.0) {
            return Err(ShieldError::validation("price", "must not be negative"));
        }
        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_LIMIT {
                return Err(ShieldError::validation(
                    "limit",
                    format!("must be between 1 and {}", MAX_LIMIT),
                ));
            }
        }
        Ok(())
    }

    fn matches(&self, product: &Product) -> bool {
        self.category
            .as_ref()
            .map_or(true, |c| product.category.eq_ignore_ascii_case(c))
            && self.metal.as_ref().map_or(true, |m| product.metal.eq_ignore_ascii_case(m))
            && self.ready_to_ship.map_or(true, |r| product.ready_to_ship == r)
            && self.min_price.map_or(true, |min| product.price >= min)
            && self.max_price.map_or(true, |max| product.price <= max)
    }
}

/// Fields an admin may change on a product
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub ready_to_ship: Option<bool>,
}

/// Which mutation produced a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    Return,
    StylistHandoff,
    Csat,
    OrderUpdates,
}

/// Acknowledgement of an executed mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReceipt {
    pub id: Uuid,
    pub kind: MutationKind,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub order_number: String,
    pub email: String,
    pub skus: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylistHandoffRequest {
    pub email: String,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsatRequest {
    pub order_number: String,
    pub score: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdatesRequest {
    pub order_number: String,
    pub email: String,
}

#[async_trait]
pub trait CatalogBackend: Send + Sync {
    async fn search(&self, query: &ProductQuery) -> ShieldResult<Vec<Product>>;

    /// Products for the given SKUs, in request order; unknown SKUs are skipped
    async fn lookup(&self, skus: &[String]) -> ShieldResult<Vec<Product>>;

    async fn update_product(&self, sku: &str, update: &ProductUpdate) -> ShieldResult<Product>;
}

#[async_trait]
pub trait MutationBackend: Send + Sync {
    async fn create_return(&self, request: &ReturnRequest) -> ShieldResult<MutationReceipt>;

    async fn stylist_handoff(&self, request: &StylistHandoffRequest) -> ShieldResult<MutationReceipt>;

    async fn submit_csat(&self, request: &CsatRequest) -> ShieldResult<MutationReceipt>;

    async fn subscribe_order_updates(
        &self,
        request: &OrderUpdatesRequest,
    ) -> ShieldResult<MutationReceipt>;
}

/// Run one backend call under `deadline`. An overrun is reported as an
/// upstream failure of `backend`; the call itself is dropped.
pub async fn call_with_deadline<T, Fut>(backend: &str, deadline: Duration, call: Fut) -> ShieldResult<T>
where
    Fut: Future<Output = ShieldResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let deadline_ms = deadline.as_millis() as u64;
            warn!(backend, deadline_ms, "Backend call timed out");
            Err(ShieldError::upstream(
                backend,
                format!("no response within {}ms", deadline_ms),
            ))
        }
    }
}

/// Seeded in-memory catalog
pub struct InMemoryCatalog {
    products: RwLock<BTreeMap<String, Product>>,
    queries: AtomicU64,
    latency: Duration,
}

impl InMemoryCatalog {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: RwLock::new(products.into_iter().map(|p| (p.sku.clone(), p)).collect()),
            queries: AtomicU64::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Catalog seeded with a small jewelry assortment
    pub fn seeded() -> Self {
        let now = Utc::now();
        let product = |sku: &str, name: &str, category: &str, metal: &str, price: f64, ready: bool, age_days: i64| Product {
            sku: sku.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            metal: metal.to_string(),
            price,
            ready_to_ship: ready,
            updated_at: now - chrono::Duration::days(age_days),
        };

        Self::new([
            product("RNG-001", "Solitaire Engagement Ring", "ring", "platinum", 2450.0, true, 3),
            product("RNG-002", "Pave Halo Ring", "ring", "white-gold", 1890.0, false, 10),
            product("RNG-003", "Classic Wedding Band", "ring", "yellow-gold", 640.0, true, 30),
            product("RNG-004", "Stackable Eternity Ring", "ring", "rose-gold", 980.0, true, 1),
            product("NCK-001", "Diamond Tennis Necklace", "necklace", "white-gold", 3200.0, false, 12),
            product("NCK-002", "Pearl Pendant", "necklace", "yellow-gold", 420.0, true, 7),
            product("EAR-001", "Diamond Stud Earrings", "earrings", "platinum", 1150.0, true, 5),
            product("EAR-002", "Hoop Earrings", "earrings", "yellow-gold", 360.0, true, 20),
            product("BRC-001", "Link Bracelet", "bracelet", "silver", 210.0, true, 15),
            product("BRC-002", "Bangle Bracelet", "bracelet", "rose-gold", 560.0, false, 2),
        ])
    }

    /// Delay every call, to simulate a slow store
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of calls that reached the catalog
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    async fn begin_call(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl CatalogBackend for InMemoryCatalog {
    async fn search(&self, query: &ProductQuery) -> ShieldResult<Vec<Product>> {
        self.begin_call().await;

        let mut results: Vec<Product> = self
            .products
            .read()
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();

        match query.sort {
            Some(ProductSort::PriceAsc) => results.sort_by(|a, b| a.price.total_cmp(&b.price)),
            Some(ProductSort::PriceDesc) => results.sort_by(|a, b| b.price.total_cmp(&a.price)),
            Some(ProductSort::Name) => results.sort_by(|a, b| a.name.cmp(&b.name)),
            Some(ProductSort::Newest) => results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
            None => {}
        }

        results.truncate(query.limit.unwrap_or(DEFAULT_LIMIT));
        Ok(results)
    }

    async fn lookup(&self, skus: &[String]) -> ShieldResult<Vec<Product>> {
        self.begin_call().await;
        let products = self.products.read();
        Ok(skus.iter().filter_map(|sku| products.get(sku).cloned()).collect())
    }

    async fn update_product(&self, sku: &str, update: &ProductUpdate) -> ShieldResult<Product> {
        self.begin_call().await;
        let mut products = self.products.write();
        let product = products
            .get_mut(sku)
            .ok_or_else(|| ShieldError::not_found(format!("product {}", sku)))?;

        if let Some(name) = &update.name {
            product.name = name.clone();
        }
        if let Some(price) = update.price {
            product.price = price;
        }
        if let Some(ready) = update.ready_to_ship {
            product.ready_to_ship = ready;
        }
        product.updated_at = Utc::now();
        Ok(product.clone())
    }
}

/// In-memory mutation sink that knows a fixed set of order numbers
pub struct InMemoryMutations {
    orders: HashSet<String>,
    executions: AtomicU64,
}

impl InMemoryMutations {
    pub fn new(orders: impl IntoIterator<Item = String>) -> Self {
        Self {
            orders: orders.into_iter().collect(),
            executions: AtomicU64::new(0),
        }
    }

    /// Orders 1001 through 1010
    pub fn seeded() -> Self {
        Self::new((1001..=1010).map(|n| n.to_string()))
    }

    /// Number of mutations that actually executed
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    fn execute(&self, kind: MutationKind, reference: &str) -> MutationReceipt {
        self.executions.fetch_add(1, Ordering::Relaxed);
        MutationReceipt {
            id: Uuid::new_v4(),
            kind,
            reference: reference.to_string(),
            created_at: Utc::now(),
        }
    }

    fn require_order(&self, order_number: &str) -> ShieldResult<()> {
        if self.orders.contains(order_number) {
            Ok(())
        } else {
            Err(ShieldError::not_found(format!("order {}", order_number)))
        }
    }
}

#[async_trait]
impl MutationBackend for InMemoryMutations {
    async fn create_return(&self, request: &ReturnRequest) -> ShieldResult<MutationReceipt> {
        self.require_order(&request.order_number)?;
        Ok(self.execute(MutationKind::Return, &request.order_number))
    }

    async fn stylist_handoff(&self, request: &StylistHandoffRequest) -> ShieldResult<MutationReceipt> {
        Ok(self.execute(MutationKind::StylistHandoff, &request.email))
    }

    async fn submit_csat(&self, request: &CsatRequest) -> ShieldResult<MutationReceipt> {
        self.require_order(&request.order_number)?;
        Ok(self.execute(MutationKind::Csat, &request.order_number))
    }

    async fn subscribe_order_updates(
        &self,
        request: &OrderUpdatesRequest,
    ) -> ShieldResult<MutationReceipt> {
        self.require_order(&request.order_number)?;
        Ok(self.execute(MutationKind::OrderUpdates, &request.order_number))
    }
}

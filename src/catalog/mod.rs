//! # Catalog Module
//!
//! The product catalog and customer mutation endpoints guarded by the
//! resilience layer. Backends sit behind traits so the HTTP surface can run
//! against the seeded in-memory implementations or a real data source.

pub mod backend;
pub mod handlers;
pub mod mutations;

pub use backend::{
    CatalogBackend, InMemoryCatalog, InMemoryMutations, MutationBackend, MutationKind,
    MutationReceipt, Product, ProductQuery, ProductSort, ProductUpdate,
};
pub use handlers::{bulk_lookup, list_products, PRODUCTS_ROUTE};

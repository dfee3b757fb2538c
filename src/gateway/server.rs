//! # HTTP Server Module
//!
//! Builds the resilience components, wires them into two axum routers and
//! serves them:
//!
//! - the public listener with the catalog read path and the mutation
//!   endpoints, each route group behind its own rate-limit policy
//! - the admin listener with performance reports, `/metrics` and `/health`
//!
//! [`Shield`] owns the components and the background sweepers. Handlers reach
//! the components through [`AppState`]; nothing is global apart from the
//! Prometheus recorder, which the binary installs once.

use crate::admin::create_performance_routes;
use crate::caching::deduplication::IdempotencyStore;
use crate::caching::read_cache::ReadCache;
use crate::catalog::backend::{CatalogBackend, InMemoryCatalog, InMemoryMutations, MutationBackend};
use crate::catalog::handlers::{bulk_lookup, list_products, PRODUCTS_ROUTE};
use crate::catalog::mutations::{
    create_return, stylist_handoff, submit_csat, subscribe_order_updates, update_product,
};
use crate::core::config::{
    ShieldConfig, POLICY_ADMIN, POLICY_CATALOG, POLICY_CATALOG_BULK, POLICY_MUTATION,
};
use crate::core::error::{ShieldError, ShieldResult};
use crate::core::sweeper::BackgroundSweeper;
use crate::middleware::{annotate_cdn_status, enforce_rate_limit, track_performance, RateLimitGate};
use crate::observability::performance::PerformanceMonitor;
use crate::traffic::rate_limiter::RateLimiterRegistry;
use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ShieldConfig>,
    pub rate_limiters: Arc<RateLimiterRegistry>,
    /// Serialized catalog responses keyed by canonical query
    pub read_cache: Arc<ReadCache<Bytes>>,
    pub idempotency: Arc<IdempotencyStore>,
    pub monitor: Arc<PerformanceMonitor>,
    pub catalog: Arc<dyn CatalogBackend>,
    pub mutations: Arc<dyn MutationBackend>,
    /// Present only when the binary installed the Prometheus recorder
    pub metrics_handle: Option<PrometheusHandle>,
    pub started_at: Instant,
}

/// The resilience layer: components, routers and lifecycle
pub struct Shield {
    state: AppState,
    sweeper: Option<BackgroundSweeper>,
}

impl Shield {
    /// Build with the seeded in-memory backends
    pub fn new(config: ShieldConfig) -> ShieldResult<Self> {
        Self::with_backends(
            config,
            Arc::new(InMemoryCatalog::seeded()),
            Arc::new(InMemoryMutations::seeded()),
        )
    }

    pub fn with_backends(
        config: ShieldConfig,
        catalog: Arc<dyn CatalogBackend>,
        mutations: Arc<dyn MutationBackend>,
    ) -> ShieldResult<Self> {
        config.validate()?;

        let state = AppState {
            rate_limiters: Arc::new(RateLimiterRegistry::from_config(&config.rate_limits)),
            read_cache: Arc::new(ReadCache::new(&config.read_cache)),
            idempotency: Arc::new(IdempotencyStore::new(&config.idempotency)),
            monitor: Arc::new(PerformanceMonitor::new(config.performance.clone())),
            config: Arc::new(config),
            catalog,
            mutations,
            metrics_handle: None,
            started_at: Instant::now(),
        };

        Ok(Self {
            state,
            sweeper: None,
        })
    }

    /// Serve `/metrics` from an installed Prometheus recorder
    pub fn with_metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics_handle = Some(handle);
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.state.config
    }

    pub fn router(&self) -> ShieldResult<Router> {
        build_router(self.state.clone())
    }

    pub fn admin_router(&self) -> ShieldResult<Router> {
        build_admin_router(self.state.clone())
    }

    /// Spawn the bucket, read cache and idempotency sweepers. Calling this
    /// again while they run does nothing.
    pub fn start_background_tasks(&mut self) {
        if self.sweeper.is_some() {
            return;
        }

        let config = &self.state.config;
        let mut sweeper = BackgroundSweeper::new();
        sweeper.spawn(self.state.rate_limiters.clone(), config.rate_limits.sweep_interval);
        sweeper.spawn(self.state.read_cache.clone(), config.read_cache.sweep_interval);
        sweeper.spawn(self.state.idempotency.clone(), config.idempotency.sweep_interval);
        self.sweeper = Some(sweeper);
    }

    pub fn background_tasks_running(&self) -> bool {
        self.sweeper.is_some()
    }

    /// Stop the sweepers and wait for them to exit
    pub async fn shutdown(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
            info!("Background sweepers stopped");
        }
    }

    /// Serve both listeners until `shutdown` resolves, then drain in-flight
    /// requests and stop the sweepers
    pub async fn serve<S>(mut self, shutdown: S) -> ShieldResult<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let server = &self.state.config.server;
        let public_addr = format!("{}:{}", server.bind_address, server.port);
        let admin_addr = format!("{}:{}", server.bind_address, server.admin_port);

        let public_listener = TcpListener::bind(&public_addr).await.map_err(|e| {
            ShieldError::internal(format!("Failed to bind public listener to {}: {}", public_addr, e))
        })?;
        let admin_listener = TcpListener::bind(&admin_addr).await.map_err(|e| {
            ShieldError::internal(format!("Failed to bind admin listener to {}: {}", admin_addr, e))
        })?;

        info!(address = %public_addr, "Public listener ready");
        info!(address = %admin_addr, "Admin listener ready");

        let public_app = self.router()?;
        let admin_app = self.admin_router()?;

        self.start_background_tasks();

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            shutdown.await;
            info!("Shutdown signal received, draining connections");
            trigger.cancel();
        });

        let public_token = token.clone();
        let public_server = axum::serve(
            public_listener,
            public_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { public_token.cancelled().await });

        let admin_token = token.clone();
        let admin_server = axum::serve(
            admin_listener,
            admin_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { admin_token.cancelled().await });

        let serving = async {
            tokio::try_join!(
                async {
                    public_server
                        .await
                        .map_err(|e| ShieldError::internal(format!("Public server error: {}", e)))
                },
                async {
                    admin_server
                        .await
                        .map_err(|e| ShieldError::internal(format!("Admin server error: {}", e)))
                },
            )
            .map(|_| ())
        };

        let drain_timeout = self.state.config.server.shutdown_timeout;
        let drain_deadline = async {
            token.cancelled().await;
            tokio::time::sleep(drain_timeout).await;
        };

        let result = tokio::select! {
            result = serving => result,
            _ = drain_deadline => {
                warn!(timeout = ?drain_timeout, "Drain timeout elapsed, dropping remaining connections");
                Ok(())
            }
        };

        // Stop the other listener if one failed
        token.cancel();
        self.shutdown().await;

        result
    }
}

/// Public router: catalog reads, bulk lookup, mutations and admin edits
pub fn build_router(state: AppState) -> ShieldResult<Router> {
    let trust_forwarded = state.config.rate_limits.trust_forwarded_headers;
    let limit = |policy: &str| -> ShieldResult<_> {
        Ok(middleware::from_fn_with_state(
            RateLimitGate::new(state.rate_limiters.policy(policy)?, trust_forwarded),
            enforce_rate_limit,
        ))
    };

    let catalog_routes = Router::new()
        .route(PRODUCTS_ROUTE, get(list_products))
        .route_layer(limit(POLICY_CATALOG)?);

    let bulk_routes = Router::new()
        .route("/api/products/bulk", post(bulk_lookup))
        .route_layer(limit(POLICY_CATALOG_BULK)?);

    let mutation_routes = Router::new()
        .route("/api/returns", post(create_return))
        .route("/api/stylist-handoff", post(stylist_handoff))
        .route("/api/csat", post(submit_csat))
        .route("/api/order-updates/subscribe", post(subscribe_order_updates))
        .route_layer(limit(POLICY_MUTATION)?);

    let admin_edit_routes = Router::new()
        .route("/api/admin/products/:sku", put(update_product))
        .route_layer(limit(POLICY_ADMIN)?);

    let monitor = state.monitor.clone();

    Ok(Router::new()
        .merge(catalog_routes)
        .merge(bulk_routes)
        .merge(mutation_routes)
        .merge(admin_edit_routes)
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(annotate_cdn_status))
                .layer(middleware::from_fn_with_state(monitor, track_performance)),
        )
        .with_state(state))
}

/// Admin router: performance reports, Prometheus exposition, health
pub fn build_admin_router(state: AppState) -> ShieldResult<Router> {
    let admin_gate = RateLimitGate::new(
        state.rate_limiters.policy(POLICY_ADMIN)?,
        state.config.rate_limits.trust_forwarded_headers,
    );

    Ok(create_performance_routes()
        .route_layer(middleware::from_fn_with_state(admin_gate, enforce_rate_limit))
        .route("/metrics", get(render_metrics))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health_info = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    });

    (StatusCode::OK, Json(health_info))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => {
            warn!("Metrics requested but no recorder is installed");
            ShieldError::not_found("metrics exporter").into_response()
        }
    }
}

//! # Performance Admin Module
//!
//! Read-only admin endpoints over the performance monitor, plus the counters
//! kept by the read cache, the idempotency store and the rate limiters.

use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::core::error::{ShieldError, ShieldResult};
use crate::gateway::server::AppState;
use crate::observability::performance::{ComplianceReport, PerformanceAlert};

/// Alerts returned when no limit is given
const DEFAULT_ALERT_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowQuery {
    /// Trailing window in milliseconds; absent means everything retained
    pub window_ms: Option<u64>,
}

impl WindowQuery {
    fn window(&self) -> ShieldResult<Option<Duration>> {
        match self.window_ms {
            Some(0) => Err(ShieldError::validation("windowMs", "must be greater than 0")),
            Some(ms) => Ok(Some(Duration::from_millis(ms))),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<usize>,
}

/// Create performance admin routes
pub fn create_performance_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/performance/stats", get(get_performance_stats))
        .route("/admin/performance/alerts", get(get_performance_alerts))
        .route("/admin/performance/compliance", get(get_compliance_report))
}

/// Latency statistics alongside cache and limiter counters
async fn get_performance_stats(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ShieldResult<Json<serde_json::Value>> {
    let window = query.window()?;
    debug!(window_ms = query.window_ms, "Performance stats requested");

    Ok(Json(json!({
        "windowMs": query.window_ms,
        "performance": state.monitor.stats(window),
        "readCache": state.read_cache.stats(),
        "idempotency": state.idempotency.stats(),
        "rateLimits": state.rate_limiters.stats(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    })))
}

/// Most recent alerts, newest first
async fn get_performance_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> ShieldResult<Json<Vec<PerformanceAlert>>> {
    let max = state.monitor.config().max_alerts;
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT).min(max);
    Ok(Json(state.monitor.recent_alerts(limit)))
}

async fn get_compliance_report(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ShieldResult<Json<ComplianceReport>> {
    let window = query.window()?;
    Ok(Json(state.monitor.compliance_report(window)))
}

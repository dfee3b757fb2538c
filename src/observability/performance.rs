//! # Performance Monitor
//!
//! Times handler calls against a latency budget and keeps two bounded rings:
//! recent request metrics and the alerts derived from them. Everything
//! reported (percentiles, hit ratio, compliance) is computed on demand from
//! the rings.
//!
//! ## Tiers
//! With the default thresholds:
//! - `optimal` under 100ms
//! - `acceptable` under 200ms
//! - `slow` under 300ms
//! - `critical` at or above 300ms
//!
//! A request is within budget when it finishes under the critical threshold.
//! Requests at or above the warning threshold raise a `warning` alert, and
//! requests at or above the critical threshold raise a `critical` alert.

use crate::core::config::PerformanceConfig;
use crate::observability::metrics::{PERFORMANCE_ALERTS, REQUEST_DURATION};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
    Bypass,
}

impl CacheOutcome {
    /// Parse the `X-App-Cache` header value; anything else counts as a bypass
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("hit") => CacheOutcome::Hit,
            Some(v) if v.eq_ignore_ascii_case("miss") => CacheOutcome::Miss,
            _ => CacheOutcome::Bypass,
        }
    }
}

/// Latency classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    Optimal,
    Acceptable,
    Slow,
    Critical,
}

impl PerformanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Optimal => "optimal",
            PerformanceTier::Acceptable => "acceptable",
            PerformanceTier::Slow => "slow",
            PerformanceTier::Critical => "critical",
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    fn recommendations(&self) -> Vec<String> {
        let hints: &[&str] = match self {
            AlertSeverity::Critical => &[
                "Inspect the backend query plan and indexes for this endpoint",
                "Confirm the read cache is absorbing repeated identical queries",
                "Reduce the page size or paginate large result sets",
                "Check for lock contention or a saturated connection pool upstream",
                "Enable response compression for large catalog payloads",
            ],
            AlertSeverity::Warning => &[
                "Watch for a sustained trend before escalating",
                "Review the cache hit ratio for this endpoint",
                "Check that large responses are served compressed",
            ],
        };
        hints.iter().map(|hint| hint.to_string()).collect()
    }
}

/// One timed request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetric {
    pub endpoint: String,
    pub method: String,
    pub response_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub status_code: u16,
    pub cache_status: CacheOutcome,
    pub is_within_budget: bool,
}

impl PerformanceMetric {
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        response_time_ms: f64,
        status_code: u16,
        cache_status: CacheOutcome,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            response_time_ms,
            timestamp: Utc::now(),
            status_code,
            cache_status,
            is_within_budget: false,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Alert raised by a slow request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub endpoint: String,
    pub threshold_ms: f64,
    pub actual_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertCounts {
    pub warning: usize,
    pub critical: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointLatency {
    pub endpoint: String,
    pub requests: usize,
    pub average_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub total_requests: usize,
    pub within_budget: usize,
    pub average_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub cache_hit_ratio: f64,
    pub alerts: AlertCounts,
    pub slowest_endpoints: Vec<EndpointLatency>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    /// Share of requests within budget, as a percentage
    pub compliance_rate: f64,
    pub target_percent: f64,
    pub meets_target: bool,
    pub stats: PerformanceStats,
    pub recommendations: Vec<String>,
}

/// Duration and tier of one measured call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub elapsed: Duration,
    pub tier: PerformanceTier,
}

/// Rolling latency monitor
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    metrics: RwLock<VecDeque<PerformanceMetric>>,
    alerts: RwLock<VecDeque<PerformanceAlert>>,
}

impl PerformanceMonitor {
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            config,
            metrics: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    pub fn classify(&self, response_time_ms: f64) -> PerformanceTier {
        if response_time_ms < self.config.optimal_ms {
            PerformanceTier::Optimal
        } else if response_time_ms < self.config.warning_ms {
            PerformanceTier::Acceptable
        } else if response_time_ms < self.config.critical_ms {
            PerformanceTier::Slow
        } else {
            PerformanceTier::Critical
        }
    }

    /// Append a metric, raising an alert when it crosses a threshold.
    /// `is_within_budget` is recomputed from the configured budget.
    pub fn record(&self, mut metric: PerformanceMetric) -> PerformanceTier {
        let ms = metric.response_time_ms;
        metric.is_within_budget = ms < self.config.critical_ms;
        let tier = self.classify(ms);

        histogram!(
            REQUEST_DURATION,
            "endpoint" => metric.endpoint.clone(),
            "method" => metric.method.clone()
        )
        .record(ms / 1000.0);

        let severity = if ms >= self.config.critical_ms {
            Some((AlertSeverity::Critical, self.config.critical_ms))
        } else if ms >= self.config.warning_ms {
            Some((AlertSeverity::Warning, self.config.warning_ms))
        } else {
            None
        };

        if let Some((severity, threshold_ms)) = severity {
            let alert = PerformanceAlert {
                severity,
                message: format!(
                    "{} {} took {:.0}ms, at or above the {:.0}ms {} threshold",
                    metric.method,
                    metric.endpoint,
                    ms,
                    threshold_ms,
                    severity.as_str()
                ),
                endpoint: metric.endpoint.clone(),
                threshold_ms,
                actual_ms: ms,
                timestamp: metric.timestamp,
                recommendations: severity.recommendations(),
            };
            counter!(PERFORMANCE_ALERTS, "severity" => severity.as_str()).increment(1);
            warn!(
                endpoint = %alert.endpoint,
                severity = severity.as_str(),
                actual_ms = ms,
                "{}",
                alert.message
            );
            push_bounded(&self.alerts, alert, self.config.max_alerts);
        } else {
            debug!(endpoint = %metric.endpoint, ms, tier = tier.as_str(), "Request timed");
        }

        push_bounded(&self.metrics, metric, self.config.max_metrics);
        tier
    }

    /// Record a finished call
    pub fn record_call(
        &self,
        endpoint: &str,
        method: &str,
        elapsed: Duration,
        status_code: u16,
        cache_status: CacheOutcome,
    ) -> PerformanceTier {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.record(PerformanceMetric::new(endpoint, method, ms, status_code, cache_status))
    }

    /// Time `call` and record it. `classify` maps a successful output to its
    /// status and cache outcome; a failure is recorded as a 500 bypass. The
    /// result is returned unchanged either way, next to its timing.
    pub async fn measure<T, E, Fut, C>(
        &self,
        endpoint: &str,
        method: &str,
        call: Fut,
        classify: C,
    ) -> (Result<T, E>, Timing)
    where
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&T) -> (u16, CacheOutcome),
    {
        let started = Instant::now();
        let result = call.await;
        let elapsed = started.elapsed();

        let (status, cache_status) = match &result {
            Ok(value) => classify(value),
            Err(_) => (500, CacheOutcome::Bypass),
        };
        let tier = self.record_call(endpoint, method, elapsed, status, cache_status);
        (result, Timing { elapsed, tier })
    }

    /// Aggregate statistics, optionally restricted to the trailing `window`
    pub fn stats(&self, window: Option<Duration>) -> PerformanceStats {
        self.stats_at(window, Utc::now())
    }

    fn stats_at(&self, window: Option<Duration>, now: DateTime<Utc>) -> PerformanceStats {
        let cutoff = window_start(window, now);
        let in_window = |ts: &DateTime<Utc>| cutoff.map_or(true, |start| *ts >= start);

        let metrics: Vec<PerformanceMetric> = self
            .metrics
            .read()
            .iter()
            .filter(|m| in_window(&m.timestamp))
            .cloned()
            .collect();

        let alerts = {
            let ring = self.alerts.read();
            let mut counts = AlertCounts::default();
            for alert in ring.iter().filter(|a| in_window(&a.timestamp)) {
                match alert.severity {
                    AlertSeverity::Warning => counts.warning += 1,
                    AlertSeverity::Critical => counts.critical += 1,
                }
            }
            counts
        };

        let total = metrics.len();
        let mut latencies: Vec<f64> = metrics.iter().map(|m| m.response_time_ms).collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        let within_budget = metrics.iter().filter(|m| m.is_within_budget).count();
        let hits = metrics
            .iter()
            .filter(|m| m.cache_status == CacheOutcome::Hit)
            .count();

        PerformanceStats {
            total_requests: total,
            within_budget,
            average_ms: mean(&latencies),
            p95_ms: percentile(&latencies, 0.95),
            p99_ms: percentile(&latencies, 0.99),
            cache_hit_ratio: ratio(hits, total),
            alerts,
            slowest_endpoints: slowest_endpoints(&metrics, self.config.top_slow_endpoints),
        }
    }

    /// Most recent alerts, newest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<PerformanceAlert> {
        self.alerts.read().iter().rev().take(limit).cloned().collect()
    }

    /// Compliance against the configured target
    pub fn compliance_report(&self, window: Option<Duration>) -> ComplianceReport {
        self.compliance_report_at(window, Utc::now())
    }

    fn compliance_report_at(&self, window: Option<Duration>, now: DateTime<Utc>) -> ComplianceReport {
        let stats = self.stats_at(window, now);
        let compliance_rate = if stats.total_requests == 0 {
            100.0
        } else {
            ratio(stats.within_budget, stats.total_requests) * 100.0
        };
        let target_percent = self.config.compliance_target_percent;
        let meets_target = compliance_rate >= target_percent;
        let recommendations = self.recommendations(&stats, compliance_rate, meets_target);

        ComplianceReport {
            compliance_rate,
            target_percent,
            meets_target,
            stats,
            recommendations,
        }
    }

    fn recommendations(&self, stats: &PerformanceStats, rate: f64, meets_target: bool) -> Vec<String> {
        if stats.total_requests == 0 {
            return vec!["No requests recorded in this window".to_string()];
        }

        let mut out = Vec::new();

        if !meets_target {
            let names: Vec<&str> = stats
                .slowest_endpoints
                .iter()
                .map(|e| e.endpoint.as_str())
                .collect();
            out.push(format!(
                "Compliance is {:.1}%, below the {:.1}% target. Start with the slowest endpoints: {}",
                rate,
                self.config.compliance_target_percent,
                names.join(", ")
            ));
        }

        if stats.p99_ms >= self.config.critical_ms {
            out.push(format!(
                "p99 latency is {:.0}ms, over the {:.0}ms critical threshold; look for outlier queries",
                stats.p99_ms, self.config.critical_ms
            ));
        }

        if stats.cache_hit_ratio < 0.5 {
            out.push(format!(
                "Cache hit ratio is {:.0}%; check that repeated reads share canonical keys or raise the read cache TTL",
                stats.cache_hit_ratio * 100.0
            ));
        }

        if stats.alerts.critical > 0 {
            out.push(format!(
                "{} critical alerts in this window; review recent alerts for the affected endpoints",
                stats.alerts.critical
            ));
        }

        if out.is_empty() {
            out.push("All endpoints are within budget; no action needed".to_string());
        }
        out
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }
}

fn push_bounded<T>(ring: &RwLock<VecDeque<T>>, item: T, max: usize) {
    let mut ring = ring.write();
    ring.push_back(item);
    while ring.len() > max.max(1) {
        ring.pop_front();
    }
}

fn window_start(window: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let window = chrono::Duration::from_std(window?).ok()?;
    now.checked_sub_signed(window)
}

/// Value at sorted index `floor(n * q)`, clamped to the last element
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn slowest_endpoints(metrics: &[PerformanceMetric], top: usize) -> Vec<EndpointLatency> {
    let mut totals: HashMap<&str, (usize, f64)> = HashMap::new();
    for metric in metrics {
        let entry = totals.entry(metric.endpoint.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += metric.response_time_ms;
    }

    let mut endpoints: Vec<EndpointLatency> = totals
        .into_iter()
        .map(|(endpoint, (requests, sum))| EndpointLatency {
            endpoint: endpoint.to_string(),
            requests,
            average_ms: sum / requests as f64,
        })
        .collect();

    endpoints.sort_by(|a, b| {
        b.average_ms
            .total_cmp(&a.average_ms)
            .then_with(|| a.endpoint.cmp(&b.endpoint))
    });
    endpoints.truncate(top);
    endpoints
}

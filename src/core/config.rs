//! # Configuration Module
//!
//! Configuration structures and loading for the resilience layer.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human-readable durations (`"5s"`, `"24h"`) through `humantime_serde`
//! - Environment variable overrides (`SHIELD_<SECTION>_<FIELD>`)
//! - Validation with all problems reported at once
//!
//! Every section carries `#[serde(default)]`, so a file only needs the values
//! it wants to change.

use crate::core::error::{ShieldError, ShieldResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Rate-limit policy guarding catalog reads
pub const POLICY_CATALOG: &str = "catalog";
/// Rate-limit policy guarding bulk catalog lookups
pub const POLICY_CATALOG_BULK: &str = "catalog_bulk";
/// Rate-limit policy guarding customer mutations
pub const POLICY_MUTATION: &str = "mutation";
/// Rate-limit policy guarding admin edits and admin reads
pub const POLICY_ADMIN: &str = "admin";

/// Policies the HTTP surface expects to find
pub const REQUIRED_POLICIES: [&str; 4] = [
    POLICY_CATALOG,
    POLICY_CATALOG_BULK,
    POLICY_MUTATION,
    POLICY_ADMIN,
];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Listener configuration
    pub server: ServerConfig,

    /// Token bucket policies and sweeping
    pub rate_limits: RateLimitConfig,

    /// Short-TTL read cache in front of the catalog
    pub read_cache: ReadCacheConfig,

    /// Idempotency memoization for mutation endpoints
    pub idempotency: IdempotencyConfig,

    /// Latency budget and monitoring rings
    pub performance: PerformanceConfig,
}

impl ShieldConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ShieldResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: ShieldConfig = serde_yaml::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> ShieldResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: ShieldConfig = serde_json::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults.
    /// Environment overrides and validation apply in both cases.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> ShieldResult<Self> {
        if tokio::fs::try_exists(path.as_ref()).await.unwrap_or(false) {
            return Self::load_from_file(path).await;
        }

        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Variables follow the pattern `SHIELD_<SECTION>_<FIELD>`,
    /// for example `SHIELD_SERVER_PORT=8080`.
    pub fn apply_env_overrides(&mut self) -> ShieldResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> ShieldResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("SHIELD_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| ShieldError::config(format!("Invalid SHIELD_SERVER_PORT: {}", e)))?;
        }

        if let Some(port) = lookup("SHIELD_SERVER_ADMIN_PORT") {
            self.server.admin_port = port.parse().map_err(|e| {
                ShieldError::config(format!("Invalid SHIELD_SERVER_ADMIN_PORT: {}", e))
            })?;
        }

        if let Some(addr) = lookup("SHIELD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(ttl) = lookup("SHIELD_READ_CACHE_TTL") {
            self.read_cache.ttl = humantime::parse_duration(&ttl)
                .map_err(|e| ShieldError::config(format!("Invalid SHIELD_READ_CACHE_TTL: {}", e)))?;
        }

        if let Some(ttl) = lookup("SHIELD_IDEMPOTENCY_TTL") {
            self.idempotency.ttl = humantime::parse_duration(&ttl).map_err(|e| {
                ShieldError::config(format!("Invalid SHIELD_IDEMPOTENCY_TTL: {}", e))
            })?;
        }

        if let Some(critical) = lookup("SHIELD_PERFORMANCE_CRITICAL_MS") {
            self.performance.critical_ms = critical.parse().map_err(|e| {
                ShieldError::config(format!("Invalid SHIELD_PERFORMANCE_CRITICAL_MS: {}", e))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem found
    pub fn validate(&self) -> ShieldResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }
        if self.server.port == self.server.admin_port && self.server.port != 0 {
            errors.push("port and admin_port must differ".to_string());
        }
        if self.server.backend_timeout.is_zero() {
            errors.push("server.backend_timeout must be greater than 0".to_string());
        }

        for required in REQUIRED_POLICIES {
            if !self.rate_limits.policies.contains_key(required) {
                errors.push(format!("rate limit policy '{}' is missing", required));
            }
        }
        for (name, policy) in &self.rate_limits.policies {
            if policy.max_tokens <= 0.0 {
                errors.push(format!("policy '{}': max_tokens must be greater than 0", name));
            }
            if policy.refill_rate <= 0.0 {
                errors.push(format!("policy '{}': refill_rate must be greater than 0", name));
            }
            if policy.cost <= 0.0 || policy.cost > policy.max_tokens {
                errors.push(format!(
                    "policy '{}': cost must be greater than 0 and at most max_tokens",
                    name
                ));
            }
        }
        if self.rate_limits.sweep_interval.is_zero() {
            errors.push("rate_limits.sweep_interval must be greater than 0".to_string());
        }

        if self.read_cache.ttl.is_zero() {
            errors.push("read_cache.ttl must be greater than 0".to_string());
        }
        if self.read_cache.max_entries == 0 {
            errors.push("read_cache.max_entries must be greater than 0".to_string());
        }
        if self.read_cache.sweep_interval.is_zero() {
            errors.push("read_cache.sweep_interval must be greater than 0".to_string());
        }

        if self.idempotency.ttl.is_zero() {
            errors.push("idempotency.ttl must be greater than 0".to_string());
        }
        if self.idempotency.header_name.trim().is_empty() {
            errors.push("idempotency.header_name cannot be empty".to_string());
        }
        if self.idempotency.max_entries == 0 {
            errors.push("idempotency.max_entries must be greater than 0".to_string());
        }
        if self.idempotency.sweep_interval.is_zero() {
            errors.push("idempotency.sweep_interval must be greater than 0".to_string());
        }

        let perf = &self.performance;
        if !(perf.optimal_ms < perf.warning_ms && perf.warning_ms < perf.critical_ms) {
            errors.push("performance thresholds must satisfy optimal_ms < warning_ms < critical_ms".to_string());
        }
        if perf.max_metrics == 0 || perf.max_alerts == 0 {
            errors.push("performance ring sizes must be greater than 0".to_string());
        }
        if !(0.0..=100.0).contains(&perf.compliance_target_percent) {
            errors.push("performance.compliance_target_percent must be within 0..=100".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShieldError::config(errors.join("; ")))
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address shared by both listeners
    pub bind_address: String,

    /// Port for the public catalog and mutation routes
    pub port: u16,

    /// Port for admin routes (performance reports, metrics export)
    pub admin_port: u16,

    /// How long in-flight requests get to finish on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Deadline for one catalog or mutation backend call; an overrun is
    /// answered with 502
    #[serde(with = "humantime_serde")]
    pub backend_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            admin_port: 9080,
            shutdown_timeout: Duration::from_secs(30),
            backend_timeout: Duration::from_secs(5),
        }
    }
}

/// One token bucket configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketPolicy {
    /// Burst capacity
    pub max_tokens: f64,

    /// Tokens regained per second
    pub refill_rate: f64,

    /// Tokens debited per admitted call
    #[serde(default = "default_cost")]
    pub cost: f64,
}

fn default_cost() -> f64 {
    1.0
}

impl BucketPolicy {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            cost: default_cost(),
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Named bucket policies, selected per route group
    pub policies: BTreeMap<String, BucketPolicy>,

    /// Buckets untouched for this long are dropped by the sweep
    #[serde(with = "humantime_serde")]
    pub bucket_idle_ttl: Duration,

    /// How often idle buckets are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Key buckets by `X-Forwarded-For` / `X-Real-IP`. Only safe behind a
    /// proxy that overwrites those headers; otherwise the peer address is
    /// the only identity a client cannot choose.
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(POLICY_CATALOG.to_string(), BucketPolicy::new(60.0, 1.0));
        policies.insert(
            POLICY_CATALOG_BULK.to_string(),
            BucketPolicy::new(60.0, 1.0).with_cost(10.0),
        );
        policies.insert(POLICY_MUTATION.to_string(), BucketPolicy::new(10.0, 0.2));
        policies.insert(POLICY_ADMIN.to_string(), BucketPolicy::new(30.0, 0.5));

        Self {
            policies,
            bucket_idle_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            trust_forwarded_headers: true,
        }
    }
}

/// Read cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadCacheConfig {
    /// Lifetime of a cached catalog response
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Maximum number of cached keys
    pub max_entries: usize,

    /// How often expired entries are purged
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for ReadCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            max_entries: 500,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Idempotency configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Retention window for memoized responses
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Request header carrying the client-chosen key
    pub header_name: String,

    /// Maximum number of retained records
    pub max_entries: usize,

    /// Memoize 5xx responses too. Off by default so a transient failure can
    /// be retried with the same key.
    pub store_server_errors: bool,

    /// How often expired records are purged
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            header_name: "Idempotency-Key".to_string(),
            max_entries: 10_000,
            store_server_errors: false,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Latency budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Calls faster than this are optimal
    pub optimal_ms: f64,

    /// Calls at or above this raise a warning alert
    pub warning_ms: f64,

    /// Service-level ceiling; calls at or above this raise a critical alert
    pub critical_ms: f64,

    /// Metric ring capacity
    pub max_metrics: usize,

    /// Alert ring capacity
    pub max_alerts: usize,

    /// Share of calls that must land within budget
    pub compliance_target_percent: f64,

    /// How many endpoints the slowest-endpoint ranking reports
    pub top_slow_endpoints: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            optimal_ms: 100.0,
            warning_ms: 200.0,
            critical_ms: 300.0,
            max_metrics: 10_000,
            max_alerts: 1_000,
            compliance_target_percent: 95.0,
            top_slow_endpoints: 5,
        }
    }
}

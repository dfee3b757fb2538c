// Structured logging
pub mod logging;

// Prometheus export
pub mod metrics;

// Latency budget monitor
pub mod performance;

pub use logging::init_logging;
pub use performance::{
    AlertSeverity, CacheOutcome, ComplianceReport, PerformanceAlert, PerformanceMetric,
    PerformanceMonitor, PerformanceStats, PerformanceTier, Timing,
};

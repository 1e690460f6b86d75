//! Observability infrastructure for the fleet service
//!
//! Provides:
//! - Prometheus metrics (refresh latency, lifecycle operations, daemon errors, fixes)
//! - Structured JSON logging with tracing

use crate::lifecycle::OperationOutcome;
use crate::sync::SyncOutcome;
use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for fleet refresh latency (in seconds)
const REFRESH_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Histogram buckets for lifecycle operations; builds run for minutes
const OPERATION_BUCKETS: &[f64] = &[0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<FleetMetricsInner> = OnceLock::new();

struct FleetMetricsInner {
    refresh_latency_seconds: Histogram,
    units_discovered: IntGauge,
    daemon_errors: IntCounter,
    operations: IntCounterVec,
    operation_duration_seconds: HistogramVec,
    fixes_applied: IntCounter,
    host_cpu_usage_percent: Gauge,
    host_memory_used_bytes: IntGauge,
}

impl FleetMetricsInner {
    fn new() -> Self {
        Self {
            refresh_latency_seconds: register_histogram!(
                "fleet_refresh_latency_seconds",
                "Time spent assembling a fleet or unit snapshot",
                REFRESH_BUCKETS.to_vec()
            )
            .expect("Failed to register refresh_latency_seconds"),

            units_discovered: register_int_gauge!(
                "fleet_units_discovered",
                "Number of benchmark units found by the last full refresh"
            )
            .expect("Failed to register units_discovered"),

            daemon_errors: register_int_counter!(
                "fleet_daemon_errors_total",
                "Total number of failed container daemon calls"
            )
            .expect("Failed to register daemon_errors"),

            operations: register_int_counter_vec!(
                "fleet_lifecycle_operations_total",
                "Lifecycle operations by kind and outcome",
                &["operation", "outcome"]
            )
            .expect("Failed to register lifecycle_operations"),

            operation_duration_seconds: register_histogram_vec!(
                "fleet_lifecycle_operation_duration_seconds",
                "Wall time of lifecycle operations",
                &["operation"],
                OPERATION_BUCKETS.to_vec()
            )
            .expect("Failed to register operation_duration_seconds"),

            fixes_applied: register_int_counter!(
                "fleet_fixes_applied_total",
                "Total number of compatibility fixes written to disk"
            )
            .expect("Failed to register fixes_applied"),

            host_cpu_usage_percent: register_gauge!(
                "fleet_host_cpu_usage_percent",
                "CPU utilisation from the last resource sample"
            )
            .expect("Failed to register host_cpu_usage_percent"),

            host_memory_used_bytes: register_int_gauge!(
                "fleet_host_memory_used_bytes",
                "Memory in use from the last resource sample"
            )
            .expect("Failed to register host_memory_used_bytes"),
        }
    }
}

/// Fleet metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct FleetMetrics {
    _private: (),
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(FleetMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &FleetMetricsInner {
        GLOBAL_METRICS.get_or_init(FleetMetricsInner::new)
    }

    pub fn observe_refresh_latency(&self, duration_secs: f64) {
        self.inner().refresh_latency_seconds.observe(duration_secs);
    }

    pub fn set_units_discovered(&self, count: i64) {
        self.inner().units_discovered.set(count);
    }

    pub fn inc_daemon_errors(&self) {
        self.inner().daemon_errors.inc();
    }

    /// Record a finished lifecycle operation
    pub fn record_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .operations
            .with_label_values(&[operation, outcome])
            .inc();
        self.inner()
            .operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn add_fixes_applied(&self, count: u64) {
        self.inner().fixes_applied.inc_by(count);
    }

    pub fn set_host_usage(&self, cpu_percent: f64, memory_used_bytes: u64) {
        self.inner().host_cpu_usage_percent.set(cpu_percent);
        self.inner()
            .host_memory_used_bytes
            .set(memory_used_bytes.min(i64::MAX as u64) as i64);
    }
}

/// Structured logger for fleet events
///
/// Consistent JSON-formatted events for refreshes, lifecycle operations,
/// patches and catalog syncs.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, benchmarks_dir: &str) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            benchmarks_dir = %benchmarks_dir,
            "Fleet service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Fleet service shutting down"
        );
    }

    /// Log the summary of a fleet refresh
    pub fn log_refresh(
        &self,
        units: usize,
        containers: usize,
        daemon_connected: bool,
        elapsed_ms: u64,
    ) {
        if daemon_connected {
            info!(
                event = "fleet_refresh",
                instance = %self.instance,
                units = units,
                containers = containers,
                elapsed_ms = elapsed_ms,
                "Fleet refreshed"
            );
        } else {
            warn!(
                event = "fleet_refresh",
                instance = %self.instance,
                units = units,
                daemon_connected = false,
                elapsed_ms = elapsed_ms,
                "Fleet refreshed without daemon state"
            );
        }
    }

    /// Log a completed lifecycle operation
    pub fn log_operation(&self, outcome: &OperationOutcome) {
        if outcome.success {
            info!(
                event = "lifecycle_operation",
                instance = %self.instance,
                unit = %outcome.unit,
                operation = %outcome.operation,
                success = true,
                "Lifecycle operation completed"
            );
        } else {
            warn!(
                event = "lifecycle_operation",
                instance = %self.instance,
                unit = %outcome.unit,
                operation = %outcome.operation,
                success = false,
                error = ?outcome.error,
                "Lifecycle operation failed"
            );
        }
    }

    pub fn log_fixes(&self, unit: &str, fixes: usize, applied: bool) {
        let event = if applied {
            "fixes_applied"
        } else {
            "fixes_analyzed"
        };
        info!(
            event = %event,
            instance = %self.instance,
            unit = %unit,
            fixes = fixes,
            "Compatibility check finished"
        );
    }

    pub fn log_sync(&self, outcome: &SyncOutcome) {
        if outcome.success {
            info!(
                event = "catalog_sync",
                instance = %self.instance,
                action = ?outcome.action,
                "Benchmark catalog synchronised"
            );
        } else {
            warn!(
                event = "catalog_sync",
                instance = %self.instance,
                action = ?outcome.action,
                output = %outcome.output,
                "Benchmark catalog sync failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_metrics_creation() {
        let metrics = FleetMetrics::new();

        metrics.observe_refresh_latency(0.01);
        metrics.set_units_discovered(104);
        metrics.inc_daemon_errors();
        metrics.record_operation("build", true, 42.0);
        metrics.record_operation("stop", false, 0.3);
        metrics.add_fixes_applied(3);
        metrics.set_host_usage(12.5, 1024);

        // Clones share the global registry
        let clone = metrics.clone();
        clone.set_units_discovered(100);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("fleet-test");
        assert_eq!(logger.instance, "fleet-test");
    }
}

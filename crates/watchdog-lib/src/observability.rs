//! Observability infrastructure for the watchdog
//!
//! Provides:
//! - Prometheus metrics (sampling latency, monitored entities, alert counts)
//! - Structured logging of lifecycle and alert events with tracing

use crate::models::{AlertEvent, Severity};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for sampling cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatchdogMetricsInner> = OnceLock::new();

struct WatchdogMetricsInner {
    sampling_latency_seconds: Histogram,
    entities_monitored: IntGauge,
    fetch_errors: IntCounter,
    evaluation_errors: IntCounter,
    alerts_emitted: IntCounterVec,
    alerts_throttled: IntCounterVec,
    delivery_failures: IntCounterVec,
}

impl WatchdogMetricsInner {
    fn new() -> Self {
        Self {
            sampling_latency_seconds: register_histogram!(
                "container_watchdog_sampling_latency_seconds",
                "Time spent fetching and recording stats for all entities",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sampling_latency_seconds"),

            entities_monitored: register_int_gauge!(
                "container_watchdog_entities_monitored",
                "Number of live, non-excluded entities in the last sampling cycle"
            )
            .expect("Failed to register entities_monitored"),

            fetch_errors: register_int_counter!(
                "container_watchdog_fetch_errors_total",
                "Stats fetches that failed or timed out"
            )
            .expect("Failed to register fetch_errors"),

            evaluation_errors: register_int_counter!(
                "container_watchdog_evaluation_errors_total",
                "Evaluations skipped because data was unavailable"
            )
            .expect("Failed to register evaluation_errors"),

            alerts_emitted: register_int_counter_vec!(
                "container_watchdog_alerts_emitted_total",
                "Alert events produced by the evaluation cycle",
                &["severity", "metric"]
            )
            .expect("Failed to register alerts_emitted"),

            alerts_throttled: register_int_counter_vec!(
                "container_watchdog_alerts_throttled_total",
                "Alert events dropped by a channel throttle",
                &["channel"]
            )
            .expect("Failed to register alerts_throttled"),

            delivery_failures: register_int_counter_vec!(
                "container_watchdog_delivery_failures_total",
                "Alert events a channel failed to deliver",
                &["channel"]
            )
            .expect("Failed to register delivery_failures"),
        }
    }
}

/// Watchdog metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct WatchdogMetrics {
    _private: (),
}

impl Default for WatchdogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogMetrics {
    /// Create a handle, registering the global metrics on first call
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatchdogMetricsInner {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new)
    }

    pub fn observe_sampling_latency(&self, duration_secs: f64) {
        self.inner().sampling_latency_seconds.observe(duration_secs);
    }

    pub fn set_entities_monitored(&self, count: i64) {
        self.inner().entities_monitored.set(count);
    }

    pub fn inc_fetch_errors(&self) {
        self.inner().fetch_errors.inc();
    }

    pub fn inc_evaluation_errors(&self) {
        self.inner().evaluation_errors.inc();
    }

    pub fn inc_alerts_emitted(&self, event: &AlertEvent) {
        self.inner()
            .alerts_emitted
            .with_label_values(&[event.severity.as_str(), event.metric.as_str()])
            .inc();
    }

    pub fn inc_alerts_throttled(&self, channel: &str) {
        self.inner()
            .alerts_throttled
            .with_label_values(&[channel])
            .inc();
    }

    pub fn inc_delivery_failures(&self, channel: &str) {
        self.inner()
            .delivery_failures
            .with_label_values(&[channel])
            .inc();
    }

    pub fn fetch_errors(&self) -> u64 {
        self.inner().fetch_errors.get()
    }
}

/// Structured logger for watchdog events
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Log watchdog startup
    pub fn log_startup(
        &self,
        version: &str,
        interval_secs: u64,
        cpu_threshold: f64,
        memory_threshold: f64,
        channels: usize,
    ) {
        info!(
            event = "watchdog_started",
            host = %self.host,
            version = %version,
            interval_secs = interval_secs,
            cpu_threshold = cpu_threshold,
            memory_threshold = memory_threshold,
            channels = channels,
            "Container watchdog started"
        );
    }

    /// Log watchdog shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "watchdog_shutdown",
            host = %self.host,
            reason = %reason,
            "Container watchdog shutting down"
        );
    }

    /// Log an alert produced by the evaluation cycle
    pub fn log_alert(&self, alert: &AlertEvent) {
        match alert.severity {
            Severity::Warning => {
                warn!(
                    event = "threshold_exceeded",
                    host = %self.host,
                    entity_id = %alert.entity_id,
                    display_name = %alert.display_name,
                    metric = %alert.metric,
                    severity = %alert.severity,
                    value = alert.value,
                    threshold = alert.threshold,
                    consecutive = alert.consecutive_breaches,
                    "Metric over threshold"
                );
            }
            Severity::Restored => {
                info!(
                    event = "threshold_restored",
                    host = %self.host,
                    entity_id = %alert.entity_id,
                    display_name = %alert.display_name,
                    metric = %alert.metric,
                    severity = %alert.severity,
                    value = alert.value,
                    threshold = alert.threshold,
                    after = alert.consecutive_breaches,
                    "Metric back under threshold"
                );
            }
            Severity::Info => {}
        }
    }
}

//! Observability infrastructure for the analysis engine
//!
//! Provides:
//! - Prometheus metrics (analysis latency, VMs evaluated/skipped, results, failures)
//! - Structured logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for a full analysis pass (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AnalyzerMetricsInner> = OnceLock::new();

struct AnalyzerMetricsInner {
    analysis_latency_seconds: HistogramVec,
    vms_evaluated: IntCounterVec,
    vms_skipped: IntCounterVec,
    results_emitted: IntCounterVec,
    analysis_failures: IntCounterVec,
    findings_persisted: IntCounter,
}

impl AnalyzerMetricsInner {
    fn new() -> Self {
        Self {
            analysis_latency_seconds: register_histogram_vec!(
                "vm_analyzer_analysis_latency_seconds",
                "Time spent running one analysis over a connection",
                &["kind"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register analysis_latency_seconds"),

            vms_evaluated: register_int_counter_vec!(
                "vm_analyzer_vms_evaluated_total",
                "Powered-on VMs evaluated by an analyzer",
                &["kind"]
            )
            .expect("Failed to register vms_evaluated"),

            vms_skipped: register_int_counter_vec!(
                "vm_analyzer_vms_skipped_total",
                "VMs skipped because a required metric series was missing",
                &["kind"]
            )
            .expect("Failed to register vms_skipped"),

            results_emitted: register_int_counter_vec!(
                "vm_analyzer_results_emitted_total",
                "Analysis results produced",
                &["kind"]
            )
            .expect("Failed to register results_emitted"),

            analysis_failures: register_int_counter_vec!(
                "vm_analyzer_analysis_failures_total",
                "Analyses aborted by inventory errors or cancellation",
                &["kind"]
            )
            .expect("Failed to register analysis_failures"),

            findings_persisted: register_int_counter!(
                "vm_analyzer_findings_persisted_total",
                "Findings handed to the finding sink"
            )
            .expect("Failed to register findings_persisted"),
        }
    }
}

/// Analyzer metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying collectors.
#[derive(Clone)]
pub struct AnalyzerMetrics {
    _private: (),
}

impl Default for AnalyzerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AnalyzerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AnalyzerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_analysis_latency(&self, kind: &str, duration_secs: f64) {
        self.inner()
            .analysis_latency_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn inc_vms_evaluated(&self, kind: &str) {
        self.inner().vms_evaluated.with_label_values(&[kind]).inc();
    }

    pub fn inc_vms_skipped(&self, kind: &str) {
        self.inner().vms_skipped.with_label_values(&[kind]).inc();
    }

    pub fn add_results_emitted(&self, kind: &str, count: usize) {
        self.inner()
            .results_emitted
            .with_label_values(&[kind])
            .inc_by(count as u64);
    }

    pub fn inc_analysis_failures(&self, kind: &str) {
        self.inner().analysis_failures.with_label_values(&[kind]).inc();
    }

    pub fn add_findings_persisted(&self, count: usize) {
        self.inner().findings_persisted.inc_by(count as u64);
    }
}

/// Structured logger for analysis events
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_analysis_started(&self, kind: &str, connection_id: u64, vm_count: usize) {
        info!(
            event = "analysis_started",
            component = %self.component,
            kind = %kind,
            connection_id = connection_id,
            vm_count = vm_count,
            "Analysis started"
        );
    }

    pub fn log_analysis_completed(
        &self,
        kind: &str,
        connection_id: u64,
        results: usize,
        skipped: usize,
        duration_ms: u128,
    ) {
        info!(
            event = "analysis_completed",
            component = %self.component,
            kind = %kind,
            connection_id = connection_id,
            results = results,
            skipped = skipped,
            duration_ms = duration_ms as u64,
            "Analysis completed"
        );
    }

    pub fn log_analysis_failed(&self, kind: &str, connection_id: u64, error: &str) {
        warn!(
            event = "analysis_failed",
            component = %self.component,
            kind = %kind,
            connection_id = connection_id,
            error = %error,
            "Analysis failed"
        );
    }

    pub fn log_analysis_cancelled(
        &self,
        kind: &str,
        connection_id: u64,
        processed: usize,
        total: usize,
    ) {
        warn!(
            event = "analysis_cancelled",
            component = %self.component,
            kind = %kind,
            connection_id = connection_id,
            processed = processed,
            total = total,
            "Analysis cancelled"
        );
    }

    /// VM left out of the result set; not an error
    pub fn log_vm_skipped(&self, kind: &str, vm_name: &str, reason: &str) {
        debug!(
            event = "vm_skipped",
            component = %self.component,
            kind = %kind,
            vm = %vm_name,
            reason = %reason,
            "VM skipped"
        );
    }

    pub fn log_zombie_detected(&self, vm_name: &str, confidence: f64, low_usage_days: u32) {
        if confidence >= 90.0 {
            warn!(
                event = "zombie_detected",
                component = %self.component,
                vm = %vm_name,
                confidence = confidence,
                low_usage_days = low_usage_days,
                "Very likely zombie VM detected"
            );
        } else {
            info!(
                event = "zombie_detected",
                component = %self.component,
                vm = %vm_name,
                confidence = confidence,
                low_usage_days = low_usage_days,
                "Possible zombie VM detected"
            );
        }
    }

    pub fn log_findings_persisted(&self, task_id: u64, count: usize) {
        info!(
            event = "findings_persisted",
            component = %self.component,
            task_id = task_id,
            count = count,
            "Findings persisted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyzer_metrics_creation() {
        let metrics = AnalyzerMetrics::new();

        metrics.observe_analysis_latency("zombie", 0.01);
        metrics.inc_vms_evaluated("zombie");
        metrics.inc_vms_skipped("tidal");
        metrics.add_results_emitted("rightsize", 3);
        metrics.inc_analysis_failures("health");
        metrics.add_findings_persisted(4);

        // Second handle shares the registered collectors
        let again = AnalyzerMetrics::new();
        again.inc_vms_evaluated("zombie");
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("analysis-engine");
        assert_eq!(logger.component, "analysis-engine");
    }
}

//! Prometheus metrics for the report endpoints and partition fetches.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics registry instance
/// Counters are registered without the `_total` suffix; the encoder appends it.
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Report name (e.g., "top_products")
    pub report: String,
    /// "success" or "error"
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub report: String,
    pub error_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReportLabels {
    pub report: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FetchLabels {
    /// Table prefix (e.g., "orders")
    pub prefix: String,
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PrefixLabels {
    pub prefix: String,
}

pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Report requests by report and status
    pub report_requests_total: Family<RequestLabels, Counter>,
    /// Report latency by report
    pub report_request_duration_seconds: Family<ReportLabels, Histogram>,
    /// Reports currently being computed
    pub report_active_requests: Family<ReportLabels, Gauge>,
    /// Report failures by error type
    pub report_errors_total: Family<ErrorLabels, Counter>,
    /// Partition fetches by prefix and status
    pub partition_fetches_total: Family<FetchLabels, Counter>,
    /// Rows fetched by prefix
    pub partition_rows_total: Family<PrefixLabels, Counter>,
    /// Partition fetch latency by prefix
    pub partition_fetch_duration_seconds: Family<PrefixLabels, Histogram>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let report_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "report_requests",
            "Total number of report requests",
            report_requests_total.clone(),
        );

        let report_request_duration_seconds =
            Family::<ReportLabels, Histogram>::new_with_constructor(|| {
                // 10ms .. ~38s
                Histogram::new(exponential_buckets(0.01, 2.5, 10))
            });
        registry.register(
            "report_request_duration_seconds",
            "Report latency histogram in seconds",
            report_request_duration_seconds.clone(),
        );

        let report_active_requests = Family::<ReportLabels, Gauge>::default();
        registry.register(
            "report_active_requests",
            "Number of reports currently being computed",
            report_active_requests.clone(),
        );

        let report_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "report_errors",
            "Total number of failed reports by error type",
            report_errors_total.clone(),
        );

        let partition_fetches_total = Family::<FetchLabels, Counter>::default();
        registry.register(
            "partition_fetches",
            "Total number of partition table fetches",
            partition_fetches_total.clone(),
        );

        let partition_rows_total = Family::<PrefixLabels, Counter>::default();
        registry.register(
            "partition_rows",
            "Total number of rows fetched from partition tables",
            partition_rows_total.clone(),
        );

        let partition_fetch_duration_seconds =
            Family::<PrefixLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.5, 10))
            });
        registry.register(
            "partition_fetch_duration_seconds",
            "Partition fetch latency histogram in seconds",
            partition_fetch_duration_seconds.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            report_requests_total,
            report_request_duration_seconds,
            report_active_requests,
            report_errors_total,
            partition_fetches_total,
            partition_rows_total,
            partition_fetch_duration_seconds,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(error) = encode(&mut buffer, &registry) {
            tracing::warn!(%error, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_report_success(&self, report: &str, duration: Duration) {
        self.report_requests_total
            .get_or_create(&RequestLabels {
                report: report.to_string(),
                status: "success".to_string(),
            })
            .inc();
        self.observe_duration(report, duration);
    }

    pub fn record_report_error(&self, report: &str, duration: Duration, error_type: &str) {
        self.report_requests_total
            .get_or_create(&RequestLabels {
                report: report.to_string(),
                status: "error".to_string(),
            })
            .inc();
        self.observe_duration(report, duration);
        self.report_errors_total
            .get_or_create(&ErrorLabels {
                report: report.to_string(),
                error_type: error_type.to_string(),
            })
            .inc();
    }

    pub fn record_partition_fetch(
        &self,
        prefix: &str,
        status: &str,
        rows: usize,
        duration: Duration,
    ) {
        self.partition_fetches_total
            .get_or_create(&FetchLabels {
                prefix: prefix.to_string(),
                status: status.to_string(),
            })
            .inc();
        let labels = PrefixLabels {
            prefix: prefix.to_string(),
        };
        self.partition_rows_total
            .get_or_create(&labels)
            .inc_by(rows as u64);
        self.partition_fetch_duration_seconds
            .get_or_create(&labels)
            .observe(duration.as_secs_f64());
    }

    fn observe_duration(&self, report: &str, duration: Duration) {
        self.report_request_duration_seconds
            .get_or_create(&ReportLabels {
                report: report.to_string(),
            })
            .observe(duration.as_secs_f64());
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard timing one report request.
///
/// Dropping the guard without calling [`RequestMetrics::success`] or
/// [`RequestMetrics::error`] records an error of type "cancelled", which is
/// what happens when a client disconnects mid-report.
pub struct RequestMetrics {
    report: &'static str,
    start: Instant,
    completed: bool,
}

impl RequestMetrics {
    pub fn new(report: &'static str) -> Self {
        METRICS.report_active_requests.get_or_create(&active(report)).inc();
        Self {
            report,
            start: Instant::now(),
            completed: false,
        }
    }

    pub fn success(mut self) {
        METRICS.record_report_success(self.report, self.start.elapsed());
        self.finish();
    }

    pub fn error(mut self, error_type: &str) {
        METRICS.record_report_error(self.report, self.start.elapsed(), error_type);
        self.finish();
    }

    fn finish(&mut self) {
        self.completed = true;
        METRICS.report_active_requests.get_or_create(&active(self.report)).dec();
    }
}

impl Drop for RequestMetrics {
    fn drop(&mut self) {
        if !self.completed {
            METRICS.record_report_error(self.report, self.start.elapsed(), "cancelled");
            METRICS.report_active_requests.get_or_create(&active(self.report)).dec();
        }
    }
}

fn active(report: &str) -> ReportLabels {
    ReportLabels {
        report: report.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requests(collector: &MetricsCollector, report: &str, status: &str) -> u64 {
        collector
            .report_requests_total
            .get_or_create(&RequestLabels {
                report: report.to_string(),
                status: status.to_string(),
            })
            .get()
    }

    #[test]
    fn records_success_and_error() {
        let collector = MetricsCollector::new();
        collector.record_report_success("order_trends", Duration::from_millis(12));
        collector.record_report_error("order_trends", Duration::from_millis(3), "timeout");

        assert_eq!(requests(&collector, "order_trends", "success"), 1);
        assert_eq!(requests(&collector, "order_trends", "error"), 1);
        assert_eq!(
            collector
                .report_errors_total
                .get_or_create(&ErrorLabels {
                    report: "order_trends".into(),
                    error_type: "timeout".into(),
                })
                .get(),
            1
        );
    }

    #[test]
    fn partition_rows_accumulate() {
        let collector = MetricsCollector::new();
        collector.record_partition_fetch("orders", "success", 40, Duration::from_millis(5));
        collector.record_partition_fetch("orders", "success", 2, Duration::from_millis(5));
        let rows = collector
            .partition_rows_total
            .get_or_create(&PrefixLabels {
                prefix: "orders".into(),
            })
            .get();
        assert_eq!(rows, 42);
    }

    #[test]
    fn encode_contains_registered_metrics() {
        let collector = MetricsCollector::new();
        collector.record_report_success("top_products", Duration::from_millis(1));
        let text = collector.encode();
        assert!(text.contains("report_requests_total"));
        assert!(text.contains("top_products"));
    }

    #[test]
    fn dropped_guard_counts_as_cancelled() {
        let guard = RequestMetrics::new("dropped_guard_report");
        drop(guard);
        let cancelled = METRICS
            .report_errors_total
            .get_or_create(&ErrorLabels {
                report: "dropped_guard_report".into(),
                error_type: "cancelled".into(),
            })
            .get();
        assert_eq!(cancelled, 1);
    }
}

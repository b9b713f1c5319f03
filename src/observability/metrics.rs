use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec, TextEncoder,
};

// Metrics registry
static RATE_LIMIT_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Total number of rate limit decisions",
        &["endpoint", "outcome"]
    )
    .unwrap()
});

static RATE_LIMIT_STORE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_store_errors_total",
        "Total number of store failures that caused a fail-open decision",
        &["kind"]
    )
    .unwrap()
});

static RATE_LIMIT_STORE_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rate_limit_store_call_seconds",
        "Store round trip latency in seconds",
        &["op"],
        vec![0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500]
    )
    .unwrap()
});

pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn record_decision(endpoint: &str, outcome: &str) {
        RATE_LIMIT_DECISIONS_TOTAL
            .with_label_values(&[endpoint, outcome])
            .inc();
    }

    pub fn record_store_error(kind: &str) {
        RATE_LIMIT_STORE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_store_call(op: &str, duration: f64) {
        RATE_LIMIT_STORE_CALL_DURATION
            .with_label_values(&[op])
            .observe(duration);
    }

    /// Export all metrics in Prometheus format
    pub fn export() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode_to_string(&metric_families)
    }
}

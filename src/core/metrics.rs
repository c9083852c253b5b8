//! Prometheus metrics for monitoring the proxy.
//!
//! Metrics are registered once in the default registry and exposed on
//! `/metrics` in the text exposition format.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, Encoder, GaugeVec,
    HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, endpoint and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Upstream attempts by operation and outcome (success, error, rate_limited, transport)
    pub upstream_attempts: IntCounterVec,

    /// Upstream latency per attempt in seconds
    pub upstream_latency: HistogramVec,

    /// Requests rejected by the local rate limiter
    pub rate_limited: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// This should be called once at application startup. Subsequent calls will
/// return the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "autoreply_proxy_requests_total",
            "Total number of requests",
            &["method", "endpoint", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "autoreply_proxy_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "autoreply_proxy_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let upstream_attempts = register_int_counter_vec!(
            "autoreply_proxy_upstream_attempts_total",
            "Upstream attempts by operation and outcome",
            &["operation", "outcome"]
        )
        .expect("Failed to register upstream_attempts metric");

        let upstream_latency = register_histogram_vec!(
            "autoreply_proxy_upstream_latency_seconds",
            "Upstream response latency per attempt in seconds",
            &["operation"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register upstream_latency metric");

        let rate_limited = register_int_counter_vec!(
            "autoreply_proxy_rate_limited_total",
            "Requests rejected by the rate limiter",
            &["endpoint"]
        )
        .expect("Failed to register rate_limited metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            upstream_attempts,
            upstream_latency,
            rate_limited,
        }
    })
}

/// Get the metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}

//! Metrics and observability utilities
//!
//! Prometheus metrics with SLO-aligned histograms and standardized naming
//! conventions, following the same pattern across this family of services.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

pub const METRICS_PREFIX: &str = "avoda";

/// SLO-aligned histogram buckets for request latency (in seconds).
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.075, 0.100, 0.150, 0.250, 0.500, 1.000, 2.500, 5.000,
    10.00,
];

/// Buckets for model-inference latency (embedding + generation).
pub const MODEL_BUCKETS: &[f64] = &[
    0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 5.000, 10.00, 30.00, 60.00,
];

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );
    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval queries by query type"
    );
    describe_histogram!(
        format!("{}_retrieval_sql_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Hybrid retrieval SQL latency in seconds, by statement kind"
    );
    describe_gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of requests returned from a retrieval"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding calls"
    );
    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );
    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding errors"
    );

    describe_counter!(
        format!("{}_llm_generate_total", METRICS_PREFIX),
        Unit::Count,
        "Total LLM generation calls, by device and outcome"
    );
    describe_histogram!(
        format!("{}_llm_generate_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "LLM generation latency in seconds"
    );
    describe_counter!(
        format!("{}_llm_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total LLM errors, by kind"
    );
    describe_gauge!(
        format!("{}_llm_queue_depth", METRICS_PREFIX),
        Unit::Count,
        "Number of generation calls currently queued or running"
    );

    describe_gauge!(
        format!("{}_db_connections_active", METRICS_PREFIX),
        Unit::Count,
        "Active database connections"
    );
    describe_histogram!(
        format!("{}_db_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Database query latency in seconds"
    );

    tracing::info!("metrics registered");
}

/// Helper to record HTTP request metrics.
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a completed retrieval: query type, SQL latency, and result count.
pub fn record_retrieval(query_type: &str, sql_duration_secs: f64, result_count: usize) {
    counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        "query_type" => query_type.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_retrieval_sql_duration_seconds", METRICS_PREFIX),
        "query_type" => query_type.to_string()
    )
    .record(sql_duration_secs);

    gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        "query_type" => query_type.to_string()
    )
    .set(result_count as f64);
}

/// Record an embedding call.
pub fn record_embedding(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(format!("{}_embedding_duration_seconds", METRICS_PREFIX)).record(duration_secs);
    } else {
        counter!(format!("{}_embedding_errors_total", METRICS_PREFIX)).increment(1);
    }
}

/// Record an LLM generation call.
pub fn record_llm_generate(duration_secs: f64, device: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_generate_total", METRICS_PREFIX),
        "device" => device.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_llm_generate_duration_seconds", METRICS_PREFIX),
            "device" => device.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(format!("{}_llm_errors_total", METRICS_PREFIX)).increment(1);
    }
}

pub fn set_llm_queue_depth(depth: usize) {
    gauge!(format!("{}_llm_queue_depth", METRICS_PREFIX)).set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
        assert!(LATENCY_BUCKETS.contains(&0.050));
        assert!(LATENCY_BUCKETS.contains(&0.150));
    }

    #[test]
    fn test_request_metrics_runs_without_panic() {
        let metrics = RequestMetrics::start("GET", "/search");
        std::thread::sleep(std::time::Duration::from_millis(5));
        metrics.finish(200);
    }
}

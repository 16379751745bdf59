//! Prometheus metrics for works-billing-service.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// HTTP request counter by method, route template, and response status.
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_http_requests_total",
        "HTTP requests by method, route, and status",
        &["method", "path", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register db_query_duration")
});

/// Budget counter by resulting status.
pub static BUDGETS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_budgets_total",
        "Total number of budget transitions by status",
        &["status"]
    )
    .expect("Failed to register budgets_total")
});

/// Webhook events by type and outcome.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_webhook_events_total",
        "Gateway webhook events by type and outcome",
        &["event_type", "outcome"] // processed, duplicate, ignored, failed
    )
    .expect("Failed to register webhook_events_total")
});

/// Notifications suppressed by the dedup filter.
pub static NOTIFICATIONS_SUPPRESSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_notifications_suppressed_total",
        "Notifications suppressed within the cooldown window",
        &["event_kind"]
    )
    .expect("Failed to register notifications_suppressed_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Request-counting middleware. Uses the matched route template as the path
/// label to keep cardinality bounded.
pub async fn track_http(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, response.status().as_str()])
        .inc();

    response
}

/// Render all registered metrics in the Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

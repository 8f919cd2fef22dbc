use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — job, extraction and dedup counters in Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

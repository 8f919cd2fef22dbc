use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use statement_scan::{app_state::AppState, config::AppConfig, db, routes};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing statement-scan server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let state = AppState::build(db_pool, &config).expect("Failed to initialize services");

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", post(routes::jobs::enqueue_job))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job_status))
        .route("/api/v1/worker/run", post(routes::jobs::trigger_worker))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        // Inline payloads carry base64 frames.
        .layer(RequestBodyLimitLayer::new(50 * 1024 * 1024));

    tracing::info!("Starting statement-scan on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

fn describe_metrics() {
    metrics::describe_counter!("extraction_jobs_total", "Total extraction jobs submitted");
    metrics::describe_counter!("extraction_jobs_completed", "Total extraction jobs completed");
    metrics::describe_counter!("extraction_jobs_failed", "Total extraction jobs that failed");
    metrics::describe_histogram!(
        "extraction_job_seconds",
        "Time to process one extraction job"
    );
    metrics::describe_gauge!(
        "extraction_queue_depth",
        "Pending jobs at the last health probe"
    );
    metrics::describe_counter!("jobs_requeued_total", "Failed jobs put back by bounded retry");
    metrics::describe_counter!("jobs_recovered_total", "Stuck jobs put back by the staleness sweep");
    metrics::describe_counter!(
        "vision_rate_limit_retries_total",
        "Vision calls retried after a rate limit response"
    );
    metrics::describe_counter!("transactions_added_total", "Transactions newly stored");
    metrics::describe_counter!(
        "transactions_duplicate_total",
        "Transactions skipped because their fingerprint already existed"
    );
}

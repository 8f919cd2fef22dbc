use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::db::jobs;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: ComponentHealth,
    pub queue: Option<QueueDepth>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct QueueDepth {
    pub pending: i64,
    pub processing: i64,
}

/// GET /health — database reachability plus current queue depth.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Health check database probe failed");
            ComponentHealth {
                status: "error".to_string(),
                latency_ms: None,
            }
        }
    };

    let healthy = database.status == "ok";
    let queue = if healthy {
        match (
            jobs::pending_count(&state.db).await,
            jobs::processing_count(&state.db).await,
        ) {
            (Ok(pending), Ok(processing)) => {
                metrics::gauge!("extraction_queue_depth").set(pending as f64);
                Some(QueueDepth { pending, processing })
            }
            _ => None,
        }
    } else {
        None
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        queue,
    };

    (status_code, Json(response))
}

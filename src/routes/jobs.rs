use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::store::JobStore;
use crate::models::job::{EnqueueResponse, JobPayload, JobStatus, JobStatusResponse, VIDEO_EXTRACT};
use crate::services::worker::RunSummary;

/// Header carrying the principal already authenticated upstream.
pub const OWNER_HEADER: &str = "x-owner-id";

fn owner_from_headers(headers: &HeaderMap) -> Result<String, StatusCode> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(StatusCode::UNAUTHORIZED)
}

/// POST /api/v1/jobs — enqueue frames for extraction.
pub async fn enqueue_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<JobPayload>,
) -> Result<(StatusCode, Json<EnqueueResponse>), StatusCode> {
    let owner = owner_from_headers(&headers)?;
    if payload.frame_count() == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let job_id = state
        .store
        .enqueue(&owner, VIDEO_EXTRACT, &payload)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to enqueue job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    metrics::counter!("extraction_jobs_total").increment(1);
    tracing::info!(job_id = %job_id, frames = payload.frame_count(), "Job enqueued");

    // Chained trigger so a quiet system does not wait for the next poll.
    let worker = state.worker.clone();
    tokio::spawn(async move {
        if let Err(e) = worker.run_once().await {
            tracing::warn!(error = %e, "Chained worker invocation failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            status: JobStatus::Pending,
            message: "Frames queued for extraction".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id} — job status, visible only to its owner.
pub async fn get_job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let owner = owner_from_headers(&headers)?;

    let job = state
        .store
        .get_for_owner(job_id, &owner)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(job.into()))
}

/// POST /api/v1/worker/run — run one worker invocation and report what it did.
pub async fn trigger_worker(State(state): State<AppState>) -> Result<Json<RunSummary>, StatusCode> {
    state.worker.run_once().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "Worker invocation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

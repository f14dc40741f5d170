//! Job endpoints: intake, listing, assignment, claim, completion.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use super::{ApiError, AppState, parse_id};
use crate::jobs::{BatchRequest, JobFilter};

/// POST /jobs-batch
///
/// One QUEUED job per task. Returns the batch's root id and the job ids.
pub async fn create_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.tasks.is_empty() {
        return Err(ApiError::BadRequest("Batch has no tasks".into()));
    }
    let created = state.jobs.create_batch(&body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /jobs?status=X&assigned_model=Y&limit=N
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.store.list_jobs(&filter).await?;
    Ok(Json(jobs))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.get(parse_id(&id)?).await?;
    Ok(Json(job))
}

/// GET /jobs/{id}/events
///
/// The job's audit trail in append order.
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    state.jobs.get(id).await?;
    let events = state.store.job_events(id).await?;
    Ok(Json(events))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    assigned_model: String,
}

/// POST /jobs/{id}/assign
///
/// Operator override. 409 if the job was already claimed or the model is
/// suspended.
pub async fn assign_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AssignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    if body.assigned_model.trim().is_empty() {
        return Err(ApiError::BadRequest("assigned_model is required".into()));
    }
    let job = state.jobs.assign_manual(id, &body.assigned_model).await?;
    Ok(Json(serde_json::json!({
        "job_id": job.id,
        "assigned_model": job.assigned_model,
        "status": job.status,
    })))
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    worker_id: String,
}

/// POST /jobs/{id}/claim
///
/// 409 unless the job is QUEUED or ASSIGNED at the moment of the update.
pub async fn claim_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ClaimRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    if body.worker_id.trim().is_empty() {
        return Err(ApiError::BadRequest("worker_id is required".into()));
    }
    let job = state.jobs.claim(id, &body.worker_id).await?;
    Ok(Json(serde_json::json!({
        "job_id": job.id,
        "worker": body.worker_id,
        "status": job.status,
    })))
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    success: bool,
    #[serde(default)]
    details: serde_json::Value,
}

/// POST /jobs/{id}/complete
///
/// Runs the accountant, then records COMPLETED or SUBMITTED.
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let details = if body.details.is_null() {
        serde_json::json!({})
    } else {
        body.details
    };
    let completion = state.jobs.complete(id, body.success, details).await?;
    Ok(Json(completion))
}

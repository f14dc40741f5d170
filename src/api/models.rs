//! Worker registration, artifacts, and operator controls.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::governance::ACTOR_OPERATOR;

/// Default number of ledger rows returned.
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// GET /models
pub async fn list_models(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_models().await?))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    endpoint: Option<String>,
}

fn default_kind() -> String {
    "local".to_string()
}

/// POST /models/{name}/register
///
/// Creates or refreshes a registration and marks it active. Suspension and
/// warnings are left untouched.
pub async fn register_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let model = state
        .store
        .upsert_model(&name, &body.kind, body.endpoint.as_deref())
        .await?;
    tracing::info!(model = %name, kind = %body.kind, "Model registered");
    Ok(Json(serde_json::json!({
        "status": "registered",
        "model": model.name,
        "suspended": model.suspended,
    })))
}

#[derive(Deserialize)]
pub struct ArtifactRequest {
    job_id: Uuid,
    artifact_type: String,
    #[serde(default)]
    artifact: serde_json::Value,
}

/// POST /models/{name}/artifact
///
/// 404 if the model is not registered or the job does not exist.
pub async fn upload_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ArtifactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let model = state
        .store
        .get_model(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Model {name} is not registered")))?;
    state.jobs.get(body.job_id).await?;

    let id = state
        .store
        .insert_artifact(body.job_id, model.id, &body.artifact_type, &body.artifact)
        .await?;
    tracing::debug!(model = %name, job_id = %body.job_id, artifact_type = %body.artifact_type, "Artifact stored");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"status": "stored", "id": id})),
    ))
}

/// POST /models/{name}/reinstate
///
/// Operator action: clears suspension and resets the warning count.
pub async fn reinstate_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.reinstate_model(&name).await? {
        return Err(ApiError::NotFound(format!("Model {name} is not registered")));
    }
    if let Err(e) = state
        .store
        .append_audit(
            ACTOR_OPERATOR,
            "model_reinstated",
            &serde_json::json!({"model": name}),
        )
        .await
    {
        tracing::error!(model = %name, "Audit write failed: {e}");
    }
    tracing::info!(model = %name, "Model reinstated");

    let model = state
        .store
        .get_model(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Model {name} is not registered")))?;
    Ok(Json(model))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

/// GET /models/{name}/performance?limit=N
///
/// Ledger history, newest first.
pub async fn performance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.store.performance_history(&name, limit).await?))
}

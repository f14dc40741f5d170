//! Health, alert intake, and the scoring and routing service boundaries.

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use super::{ApiError, AppState};
use crate::governance::{ACTOR_MANAGER, Alert, EvaluationRequest};
use crate::manager::router::suspended_models;
use crate::routing::RouteRequest;

/// Audit action for alerts delivered to the intake. The sender's own
/// `alert` entry stays the durable record.
pub const ALERT_RECEIVED_ACTION: &str = "alert_received";

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /ready
///
/// 503 until the store answers.
pub async fn ready(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .ping()
        .await
        .map_err(|e| ApiError::Unavailable(format!("Store not ready: {e}")))?;
    Ok(Json(serde_json::json!({"ready": true})))
}

/// POST /alerts
pub async fn take_alert(
    State(state): State<AppState>,
    Json(alert): Json<Alert>,
) -> Result<impl IntoResponse, ApiError> {
    let details = serde_json::to_value(&alert)
        .map_err(|e| ApiError::BadRequest(format!("Invalid alert: {e}")))?;
    state
        .store
        .append_audit(ACTOR_MANAGER, ALERT_RECEIVED_ACTION, &details)
        .await?;
    tracing::warn!(
        severity = %alert.severity,
        reason = %alert.reason,
        job_id = ?alert.job_id,
        "Alert received: {}",
        alert.message
    );
    Ok(Json(serde_json::json!({"ok": true})))
}

/// POST /evaluate
///
/// Score, classify, and ledger one report. Strikes are applied by the
/// completion path, not here.
pub async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluationRequest>,
) -> impl IntoResponse {
    Json(state.accountant.assess(&request).await)
}

/// POST /route
///
/// 404 when no catalogued, unsuspended, non-excluded model matches.
pub async fn route(
    State(state): State<AppState>,
    Json(request): Json<RouteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let unavailable = suspended_models(state.store.as_ref()).await?;
    state
        .catalog
        .select(&request, &unavailable)
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No model matches requirements {:?}",
                request.requirements
            ))
        })
}

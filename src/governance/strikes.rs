//! Two-strike enforcement on a worker's registration.
//!
//! The first `warn_or_suspend` outcome records a warning; the second
//! suspends the model. Suspension is sticky: only an operator reinstates.

use serde_json::json;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::governance::ACTOR_ACCOUNTANT;
use crate::store::Database;

/// Warnings at which a model is suspended.
pub const SUSPEND_AT: i64 = 2;

/// What enforcement did to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrikeOutcome {
    Warned { warnings_count: i64 },
    Suspended { warnings_count: i64, reason: String },
    /// No registration under that name; nothing to record.
    UnknownModel,
}

/// Apply one strike to `model_name` for `job_id`.
pub async fn enforce(
    store: &dyn Database,
    model_name: &str,
    job_id: Uuid,
) -> Result<StrikeOutcome, DatabaseError> {
    // Incremented in the store so concurrent strikes each count.
    let Some(warnings_count) = store.record_warning(model_name).await? else {
        tracing::warn!(model = %model_name, job_id = %job_id, "Strike against unregistered model");
        return Ok(StrikeOutcome::UnknownModel);
    };

    if warnings_count >= SUSPEND_AT {
        let reason = format!("Suspended after {warnings_count} warnings. Last job: {job_id}");
        store
            .suspend_model(model_name, warnings_count, &reason)
            .await?;
        tracing::warn!(model = %model_name, job_id = %job_id, warnings_count, "Model suspended");
        audit(
            store,
            "model_suspended",
            json!({"model": model_name, "job_id": job_id, "warnings_count": warnings_count, "reason": reason}),
        )
        .await;
        Ok(StrikeOutcome::Suspended {
            warnings_count,
            reason,
        })
    } else {
        tracing::info!(model = %model_name, job_id = %job_id, warnings_count, "Model warned");
        audit(
            store,
            "model_warned",
            json!({"model": model_name, "job_id": job_id, "warnings_count": warnings_count}),
        )
        .await;
        Ok(StrikeOutcome::Warned { warnings_count })
    }
}

async fn audit(store: &dyn Database, action: &str, details: serde_json::Value) {
    if let Err(e) = store.append_audit(ACTOR_ACCOUNTANT, action, &details).await {
        tracing::error!(action, "Audit write failed: {e}");
    }
}

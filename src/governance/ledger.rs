//! Durable history of scoring outcomes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::governance::classifier::Severity;
use crate::governance::scorer::Penalty;
use crate::store::Database;

/// One scoring outcome for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub id: i64,
    pub model_name: String,
    pub job_id: Uuid,
    pub score: f64,
    pub penalties: Vec<Penalty>,
    #[serde(rename = "error_severity")]
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

/// Append-only performance ledger.
pub struct Ledger {
    store: Arc<dyn Database>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }

    /// Append an outcome. Failures are logged and swallowed; a lost ledger
    /// row must never block job completion.
    pub async fn record(
        &self,
        model_name: &str,
        job_id: Uuid,
        score: f64,
        penalties: &[Penalty],
        severity: Severity,
    ) -> Option<i64> {
        let record = PerformanceRecord {
            id: 0,
            model_name: model_name.to_string(),
            job_id,
            score,
            penalties: penalties.to_vec(),
            severity,
            created_at: Utc::now(),
        };
        match self.store.insert_performance(&record).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(model = %model_name, job_id = %job_id, "Ledger write failed: {e}");
                None
            }
        }
    }

    /// A model's most recent outcomes, newest first.
    pub async fn history(
        &self,
        model_name: &str,
        limit: usize,
    ) -> Result<Vec<PerformanceRecord>, DatabaseError> {
        self.store.performance_history(model_name, limit).await
    }

    /// Total penalties recorded against a job across all its evaluations.
    pub async fn penalty_count(&self, job_id: Uuid) -> Result<usize, DatabaseError> {
        let records = self.store.job_performance(job_id).await?;
        Ok(records.iter().map(|r| r.penalties.len()).sum())
    }
}

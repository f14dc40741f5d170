//! Unified `Database` trait: single async interface for all persistence.
//!
//! Every component receives an `Arc<dyn Database>` at construction time.
//! Status changes are conditional single-statement updates; the returned
//! `bool` reports whether the row actually moved.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::governance::ledger::PerformanceRecord;
use crate::jobs::model::{Artifact, EventType, Job, JobEvent, JobFilter, JobStatus};

/// A worker registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub endpoint: Option<String>,
    pub is_active: bool,
    pub warnings_count: i64,
    pub last_warning_at: Option<DateTime<Utc>>,
    pub suspended: bool,
    pub suspension_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A post-hoc quality record. At most one exists per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRun {
    pub id: i64,
    pub model_id: i64,
    pub job_id: Uuid,
    pub project_id: Option<String>,
    pub success: bool,
    pub confidence: f64,
    pub score: f64,
    pub estimated_cost: Option<Decimal>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a run record.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub model_id: i64,
    pub job_id: Uuid,
    pub project_id: Option<String>,
    pub success: bool,
    pub confidence: f64,
    pub score: f64,
    pub estimated_cost: Option<Decimal>,
    pub details: serde_json::Value,
}

/// An entry in the global append-only audit stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub details: serde_json::Value,
    #[serde(rename = "ts")]
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering the whole control plane.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Cheap round-trip used by readiness checks.
    async fn ping(&self) -> Result<(), DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a new job.
    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Get a job by ID.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// List jobs, oldest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError>;

    /// Bind a worker identity to a job and move it to ASSIGNED, but only
    /// while its status is one of `from`.
    async fn assign_job(
        &self,
        id: Uuid,
        model: &str,
        from: &[JobStatus],
    ) -> Result<bool, DatabaseError>;

    /// Atomically move an ASSIGNED or QUEUED job to IN_PROGRESS under `worker`.
    async fn claim_job(&self, id: Uuid, worker: &str) -> Result<bool, DatabaseError>;

    /// Move an IN_PROGRESS job to its terminal status and stamp `completed_at`.
    async fn finish_job(&self, id: Uuid, success: bool) -> Result<bool, DatabaseError>;

    /// IN_PROGRESS jobs created before `before`.
    async fn stalled_jobs(&self, before: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError>;

    /// Per-identity count of SUBMITTED jobs completed at or after `since`.
    async fn failure_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>, DatabaseError>;

    // ── Job events ──────────────────────────────────────────────────

    /// Append an event to a job's trail.
    async fn append_job_event(
        &self,
        job_id: Uuid,
        event_type: EventType,
        details: &serde_json::Value,
    ) -> Result<i64, DatabaseError>;

    /// A job's events in append order.
    async fn job_events(&self, job_id: Uuid) -> Result<Vec<JobEvent>, DatabaseError>;

    // ── Models ──────────────────────────────────────────────────────

    /// Create or refresh a registration and mark it active.
    async fn upsert_model(
        &self,
        name: &str,
        kind: &str,
        endpoint: Option<&str>,
    ) -> Result<Model, DatabaseError>;

    /// Get a registration by name.
    async fn get_model(&self, name: &str) -> Result<Option<Model>, DatabaseError>;

    /// All registrations, by name.
    async fn list_models(&self) -> Result<Vec<Model>, DatabaseError>;

    /// Add one warning in a single statement and stamp `last_warning_at`.
    /// Returns the new count, or `None` if the model is unknown.
    async fn record_warning(&self, name: &str) -> Result<Option<i64>, DatabaseError>;

    /// Suspend a model. Sticky until `reinstate_model`. The stored warning
    /// count never decreases here.
    async fn suspend_model(
        &self,
        name: &str,
        warnings_count: i64,
        reason: &str,
    ) -> Result<(), DatabaseError>;

    /// Clear suspension and warnings. Returns false if the model is unknown.
    async fn reinstate_model(&self, name: &str) -> Result<bool, DatabaseError>;

    // ── Artifacts ───────────────────────────────────────────────────

    /// Store an uploaded artifact.
    async fn insert_artifact(
        &self,
        job_id: Uuid,
        model_id: i64,
        artifact_type: &str,
        artifact: &serde_json::Value,
    ) -> Result<i64, DatabaseError>;

    /// Artifacts for a job, oldest first.
    async fn job_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, DatabaseError>;

    // ── Runs ────────────────────────────────────────────────────────

    /// COMPLETED jobs with no run record yet whose assignee is registered,
    /// oldest first.
    async fn jobs_missing_run(&self, limit: usize) -> Result<Vec<Job>, DatabaseError>;

    /// COMPLETED jobs with no run record whose assignee is not registered.
    async fn count_unattributed_completions(&self) -> Result<i64, DatabaseError>;

    /// Insert a run unless the job already has one. Returns whether a row was written.
    async fn insert_run(&self, run: &NewRun) -> Result<bool, DatabaseError>;

    /// The run record for a job, if any.
    async fn get_run(&self, job_id: Uuid) -> Result<Option<ModelRun>, DatabaseError>;

    /// Runs recorded at or after `since`.
    async fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<ModelRun>, DatabaseError>;

    // ── Performance ledger ──────────────────────────────────────────

    /// Append a scoring outcome.
    async fn insert_performance(&self, record: &PerformanceRecord) -> Result<i64, DatabaseError>;

    /// A model's scoring history, newest first.
    async fn performance_history(
        &self,
        model_name: &str,
        limit: usize,
    ) -> Result<Vec<PerformanceRecord>, DatabaseError>;

    /// Every scoring outcome recorded for a job.
    async fn job_performance(&self, job_id: Uuid) -> Result<Vec<PerformanceRecord>, DatabaseError>;

    // ── Audit log ───────────────────────────────────────────────────

    /// Append to the global audit stream. Returns the new entry's id.
    async fn append_audit(
        &self,
        actor: &str,
        action: &str,
        details: &serde_json::Value,
    ) -> Result<i64, DatabaseError>;

    /// Highest audit id, or 0 when the log is empty.
    async fn max_audit_id(&self) -> Result<i64, DatabaseError>;

    /// Entries with id greater than `cursor`, ascending.
    async fn audit_after(&self, cursor: i64, limit: usize)
    -> Result<Vec<AuditEntry>, DatabaseError>;

    /// Whether an alert with this job id and reason was already logged.
    async fn alert_exists(&self, job_id: Uuid, reason: &str) -> Result<bool, DatabaseError>;

    // ── Leadership ──────────────────────────────────────────────────

    /// Try to take or renew the named lease for `holder`. Never blocks.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DatabaseError>;

    /// Drop the named lease if `holder` owns it.
    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), DatabaseError>;
}

//! Job lifecycle operations: intake, manual assignment, claim, completion.
//!
//! Every status change is one conditional update in the store. A `false`
//! from the store means another caller moved the job first, and is surfaced
//! as [`JobError::InvalidTransition`] carrying the state we then observe.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, JobError};
use crate::governance::{Action, Evaluation, EvaluationRequest, Evaluator, strikes};
use crate::jobs::model::{EventType, Job, JobStatus};
use crate::store::Database;

/// Role used when a task does not name one.
pub const DEFAULT_ROLE: &str = "Employee";

/// Body of `POST /jobs-batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub title: String,
    pub tasks: Vec<serde_json::Value>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Response of `POST /jobs-batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCreated {
    pub root_job_id: Uuid,
    pub message: String,
    pub job_ids: Vec<Uuid>,
}

/// Result of a completion report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// `None` when the job had no assignee or the accountant was unreachable.
    pub evaluation: Option<Evaluation>,
}

pub struct JobService {
    store: Arc<dyn Database>,
    evaluator: Arc<dyn Evaluator>,
}

impl JobService {
    pub fn new(store: Arc<dyn Database>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self { store, evaluator }
    }

    /// Create one QUEUED job per task, each with a `created` event holding
    /// the batch title and the task payload.
    pub async fn create_batch(&self, batch: &BatchRequest) -> Result<BatchCreated, Error> {
        let mut job_ids = Vec::with_capacity(batch.tasks.len());

        for task in &batch.tasks {
            let role = task
                .get("role")
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_ROLE);
            let job = Job::queued(role, batch.project_id.clone());

            self.store.insert_job(&job).await?;
            self.store
                .append_job_event(
                    job.id,
                    EventType::Created,
                    &json!({"title": batch.title, "task_payload": task}),
                )
                .await?;
            job_ids.push(job.id);
        }

        let root_job_id = Uuid::new_v4();
        info!(
            root_job_id = %root_job_id,
            title = %batch.title,
            jobs = job_ids.len(),
            "Batch accepted"
        );

        Ok(BatchCreated {
            root_job_id,
            message: "Batch accepted and tasks queued".to_string(),
            job_ids,
        })
    }

    /// Get a job or fail with `NotFound`.
    pub async fn get(&self, id: Uuid) -> Result<Job, Error> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| JobError::NotFound { id }.into())
    }

    /// The task payload recorded when the job was created, or `Null`.
    pub async fn task_payload(&self, id: Uuid) -> Result<serde_json::Value, Error> {
        let events = self.store.job_events(id).await?;
        Ok(events
            .into_iter()
            .find(|e| e.event_type == EventType::Created)
            .and_then(|e| e.details.get("task_payload").cloned())
            .unwrap_or(serde_json::Value::Null))
    }

    /// Operator override: bind `model` to a QUEUED or ASSIGNED job.
    pub async fn assign_manual(&self, id: Uuid, model: &str) -> Result<Job, Error> {
        let mut job = self.get(id).await?;

        let suspended = self
            .store
            .get_model(model)
            .await?
            .is_some_and(|m| m.suspended);
        if suspended {
            return Err(JobError::ModelSuspended {
                name: model.to_string(),
            }
            .into());
        }

        let moved = self
            .store
            .assign_job(id, model, &JobStatus::sources_of(JobStatus::Assigned))
            .await?;
        if !moved {
            return Err(self.rejected(id, JobStatus::Assigned).await);
        }

        self.store
            .append_job_event(id, EventType::AssignedManual, &json!({"assigned_model": model}))
            .await?;
        info!(job_id = %id, model = %model, "Job assigned manually");

        job.status = JobStatus::Assigned;
        job.assigned_model = Some(model.to_string());
        Ok(job)
    }

    /// Grant `worker` exclusive execution of a QUEUED or ASSIGNED job.
    pub async fn claim(&self, id: Uuid, worker: &str) -> Result<Job, Error> {
        let mut job = self.get(id).await?;

        if !self.store.claim_job(id, worker).await? {
            warn!(job_id = %id, worker = %worker, "Claim rejected");
            return Err(self.rejected(id, JobStatus::InProgress).await);
        }

        self.store
            .append_job_event(
                id,
                EventType::Claimed,
                &json!({"worker": worker, "ts": Utc::now().to_rfc3339()}),
            )
            .await?;
        info!(job_id = %id, worker = %worker, "Job claimed");

        job.status = JobStatus::InProgress;
        job.assigned_model = Some(worker.to_string());
        Ok(job)
    }

    /// Score the report, apply any strike, then record the terminal status.
    ///
    /// Scoring and strike failures are logged; they never stop the job's
    /// outcome from being persisted.
    pub async fn complete(
        &self,
        id: Uuid,
        success: bool,
        details: serde_json::Value,
    ) -> Result<Completion, Error> {
        let job = self.get(id).await?;
        let target = if success {
            JobStatus::Completed
        } else {
            JobStatus::Submitted
        };
        if !job.status.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id,
                state: job.status,
                target,
            }
            .into());
        }

        let evaluation = match &job.assigned_model {
            Some(model) => self.govern(&job, model, &details).await,
            None => None,
        };

        if !self.store.finish_job(id, success).await? {
            return Err(self.rejected(id, target).await);
        }

        self.store
            .append_job_event(
                id,
                EventType::Completed,
                &json!({"success": success, "details": details}),
            )
            .await?;
        info!(job_id = %id, status = %target, "Job completed");

        Ok(Completion {
            job_id: id,
            status: target,
            evaluation,
        })
    }

    async fn govern(
        &self,
        job: &Job,
        model: &str,
        details: &serde_json::Value,
    ) -> Option<Evaluation> {
        let task = match self.task_payload(job.id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(job_id = %job.id, "Task payload unavailable, scoring with defaults: {e}");
                serde_json::Value::Null
            }
        };

        let request = EvaluationRequest {
            model_name: model.to_string(),
            job_id: job.id,
            task,
            model_output: details.clone(),
        };

        let evaluation = match self.evaluator.evaluate(&request).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                tracing::error!(job_id = %job.id, model = %model, "Accountant evaluation failed: {e}");
                return None;
            }
        };

        if evaluation.action == Action::WarnOrSuspend {
            if let Err(e) = strikes::enforce(self.store.as_ref(), model, job.id).await {
                tracing::error!(job_id = %job.id, model = %model, "Strike enforcement failed: {e}");
            }
        }

        Some(evaluation)
    }

    /// Build the error for a conditional update that moved nothing.
    async fn rejected(&self, id: Uuid, target: JobStatus) -> Error {
        match self.store.get_job(id).await {
            Ok(Some(job)) => JobError::InvalidTransition {
                id,
                state: job.status,
                target,
            }
            .into(),
            Ok(None) => JobError::NotFound { id }.into(),
            Err(e) => e.into(),
        }
    }
}

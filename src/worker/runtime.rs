//! Worker runtime: poll, claim, execute, report.
//!
//! One job at a time. Failures in auxiliary steps (artifact upload,
//! snapshot) are logged and folded into the report; nothing in one
//! iteration stops the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{self, GenerationAdapter, GenerationOutput, excerpt};
use crate::api::ControlClient;
use crate::config::WorkerConfig;
use crate::error::ClientError;
use crate::jobs::{EventType, Job, JobStatus};
use crate::shutdown::Shutdown;
use crate::worker::sandbox::Sandbox;

/// Characters of output echoed in the report excerpt.
const EXCERPT_CHARS: usize = 100;

/// Pause between back-to-back jobs.
const BUSY_PAUSE: Duration = Duration::from_secs(1);

pub struct WorkerRuntime {
    worker_id: String,
    client: ControlClient,
    adapter: Arc<dyn GenerationAdapter>,
    sandbox: Sandbox,
    poll_interval: Duration,
    server_side_filter: bool,
    registered: AtomicBool,
}

impl WorkerRuntime {
    pub fn new(
        worker_id: impl Into<String>,
        client: ControlClient,
        adapter: Arc<dyn GenerationAdapter>,
        sandbox: Sandbox,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            client,
            adapter,
            sandbox,
            poll_interval,
            server_side_filter: false,
            registered: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        let client = ControlClient::new(&config.manager_url, config.request_timeout)
            .with_report_timeout(config.report_timeout);
        Self::new(
            &config.worker_id,
            client,
            adapters::create_adapter(&config.adapter),
            Sandbox::new(&config.sandbox_dir),
            config.poll_interval,
        )
        .with_server_side_filter(config.server_side_filter)
    }

    /// Ask the API to filter by identity instead of scanning every ASSIGNED job.
    pub fn with_server_side_filter(mut self, enabled: bool) -> Self {
        self.server_side_filter = enabled;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Register this identity, kind = adapter backend.
    pub async fn register(&self) -> Result<(), ClientError> {
        self.client
            .register(&self.worker_id, self.adapter.name(), None)
            .await?;
        self.registered.store(true, Ordering::SeqCst);
        info!(worker = %self.worker_id, backend = %self.adapter.name(), "Worker registered");
        Ok(())
    }

    /// The oldest ASSIGNED job bound to this identity.
    pub async fn poll(&self) -> Result<Option<Job>, ClientError> {
        let filter = self.server_side_filter.then_some(self.worker_id.as_str());
        let jobs = self.client.list_jobs(JobStatus::Assigned, filter).await?;
        Ok(jobs
            .into_iter()
            .find(|j| j.assigned_model.as_deref() == Some(self.worker_id.as_str())))
    }

    /// One poll/claim/execute/report pass. Returns the job handled, if any.
    pub async fn run_once(&self) -> Result<Option<Uuid>, ClientError> {
        let Some(job) = self.poll().await? else {
            debug!(worker = %self.worker_id, "No assigned jobs");
            return Ok(None);
        };

        match self.client.claim(job.id, &self.worker_id).await {
            Ok(_) => info!(job_id = %job.id, worker = %self.worker_id, "Claimed job"),
            Err(e) if e.is_conflict() => {
                warn!(job_id = %job.id, worker = %self.worker_id, "Claim lost: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let (success, details) = self.execute(&job).await;

        self.client.complete(job.id, success, &details).await?;
        info!(job_id = %job.id, worker = %self.worker_id, success, "Reported job");
        Ok(Some(job.id))
    }

    /// Build the prompt from the task payload recorded at intake.
    async fn prompt_for(&self, job: &Job) -> (String, serde_json::Value) {
        let task = match self.client.job_events(job.id).await {
            Ok(events) => events
                .into_iter()
                .find(|e| e.event_type == EventType::Created)
                .and_then(|e| e.details.get("task_payload").cloned())
                .unwrap_or(serde_json::Value::Null),
            Err(e) => {
                warn!(job_id = %job.id, "Could not load task payload: {e}");
                serde_json::Value::Null
            }
        };

        let description = ["prompt", "description", "title"]
            .iter()
            .find_map(|k| task.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| task.to_string());

        (
            format!("Implement task for job {} ({}): {description}", job.id, job.role),
            task,
        )
    }

    async fn execute(&self, job: &Job) -> (bool, serde_json::Value) {
        let (prompt, task) = self.prompt_for(job).await;
        let context = json!({"job": job, "task": task});

        let workspace = match self.sandbox.create_workspace(job.id).await {
            Ok(ws) => Some(ws),
            Err(e) => {
                error!(job_id = %job.id, "Failed to create workspace: {e}");
                None
            }
        };

        let out = self.adapter.generate(&prompt, &context).await;
        if let Some(err) = &out.error {
            warn!(job_id = %job.id, backend = %self.adapter.name(), "Generation failed: {err}");
        }

        if let Some(ws) = &workspace {
            if let Err(e) = self.sandbox.write_result(ws, &out.output).await {
                error!(job_id = %job.id, "Failed to write result: {e}");
            }
        }

        let artifact = json!({"output": out.output, "explanation": out.explanation});
        if let Err(e) = self
            .client
            .upload_artifact(&self.worker_id, job.id, "result", &artifact)
            .await
        {
            warn!(job_id = %job.id, "Artifact upload failed: {e}");
        }

        let snapshot = match workspace {
            Some(_) => match self.sandbox.snapshot(job.id).await {
                Ok(path) => Some(path.display().to_string()),
                Err(e) => {
                    warn!(job_id = %job.id, "Snapshot failed: {e}");
                    None
                }
            },
            None => None,
        };

        (!out.is_error(), self.report_details(&out, snapshot))
    }

    fn report_details(&self, out: &GenerationOutput, snapshot: Option<String>) -> serde_json::Value {
        json!({
            "output": out.output,
            "output_excerpt": excerpt(&out.output, EXCERPT_CHARS),
            "confidence": out.confidence,
            "snapshot": snapshot,
            "worker": self.worker_id,
            "tokens_used": out.tokens_used,
            "estimated_cost": out.estimated_cost,
            "error": out.error,
        })
    }

    /// Spawn the worker loop. It only exits on shutdown.
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                worker = %self.worker_id,
                backend = %self.adapter.name(),
                manager = %self.client.base_url(),
                "Worker started"
            );

            while !shutdown.is_triggered() {
                if !self.registered.load(Ordering::SeqCst) {
                    if let Err(e) = self.register().await {
                        warn!(worker = %self.worker_id, "Registration failed, will retry: {e}");
                    }
                }

                let wait = match self.run_once().await {
                    Ok(Some(_)) => BUSY_PAUSE,
                    Ok(None) => self.poll_interval,
                    Err(e) => {
                        error!(worker = %self.worker_id, "Worker iteration failed: {e}");
                        self.poll_interval
                    }
                };
                if !shutdown.sleep(wait).await {
                    break;
                }
            }

            info!(worker = %self.worker_id, "Worker stopped");
        })
    }
}

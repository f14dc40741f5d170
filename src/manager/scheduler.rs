//! Leader-only scheduler: binds QUEUED jobs to a worker identity.
//!
//! Each cycle re-reads the elector's flag. Selection asks the router first
//! and falls back to a fixed role table. Suspended identities are never
//! assigned; a job whose only pick is suspended stays QUEUED and is paged
//! past so it cannot hold back newer jobs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::DatabaseError;
use crate::jobs::model::{EventType, Job, JobFilter, JobStatus};
use crate::manager::leader::LeaderElector;
use crate::manager::router::{ModelRouter, suspended_models};
use crate::routing::RouteRequest;
use crate::shutdown::Shutdown;
use crate::store::Database;

/// Capability tags requested for a role.
pub fn requirements_for(role: &str) -> Vec<String> {
    let tags: &[&str] = match role {
        "Employee" => &["code", "fast"],
        "Architect" => &["deep_reason", "code"],
        "Reviewer" => &["analysis", "code"],
        _ => &["code"],
    };
    tags.iter().map(|t| t.to_string()).collect()
}

/// Identity used when the router gives no answer.
pub fn fallback_for(role: &str) -> &'static str {
    match role {
        "Architect" => "employee_openai",
        "Reviewer" => "employee_gemini",
        _ => "employee_ollama",
    }
}

/// How an identity was chosen; recorded on the `assigned` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignMethod {
    Router,
    Fallback,
}

pub struct Scheduler {
    store: Arc<dyn Database>,
    leader: Arc<LeaderElector>,
    router: Arc<dyn ModelRouter>,
    tick: Duration,
    batch_size: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Database>,
        leader: Arc<LeaderElector>,
        router: Arc<dyn ModelRouter>,
        tick: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            leader,
            router,
            tick,
            batch_size,
        }
    }

    /// Pick an identity for `job`, or `None` if every candidate is suspended.
    async fn choose(&self, job: &Job, suspended: &HashSet<String>) -> Option<(String, AssignMethod)> {
        let request = RouteRequest {
            requirements: requirements_for(&job.role),
            priority: "normal".to_string(),
            exclude_models: suspended.iter().cloned().collect(),
        };

        match self.router.route(&request).await {
            Ok(Some(route)) if !suspended.contains(&route.model) => {
                debug!(job_id = %job.id, model = %route.model, reason = %route.reason, "Router selected model");
                return Some((route.model, AssignMethod::Router));
            }
            Ok(Some(route)) => {
                warn!(job_id = %job.id, model = %route.model, "Router picked a suspended model, ignoring");
            }
            Ok(None) => debug!(job_id = %job.id, "Router had no selection, using fallback"),
            Err(e) => warn!(job_id = %job.id, "Router unavailable, using fallback: {e}"),
        }

        let fallback = fallback_for(&job.role);
        if suspended.contains(fallback) {
            warn!(job_id = %job.id, model = %fallback, "Fallback model is suspended, job stays queued");
            return None;
        }
        Some((fallback.to_string(), AssignMethod::Fallback))
    }

    /// Assign up to one batch of QUEUED jobs, oldest first. Does nothing
    /// unless this node currently leads. Returns how many jobs were assigned.
    ///
    /// Jobs that cannot be placed stay QUEUED and are paged past, so newer
    /// jobs are still considered in the same cycle.
    pub async fn run_cycle(&self) -> Result<usize, DatabaseError> {
        if !self.leader.is_leader() {
            debug!("Not leader, scheduler idle");
            return Ok(0);
        }

        let mut suspended: Option<HashSet<String>> = None;
        let mut assigned = 0;
        // QUEUED jobs at the head of the queue left in place this cycle.
        let mut skipped = 0;

        while assigned < self.batch_size {
            let page = self
                .store
                .list_jobs(&JobFilter {
                    status: Some(JobStatus::Queued),
                    limit: Some(self.batch_size - assigned),
                    offset: Some(skipped),
                    ..Default::default()
                })
                .await?;
            if page.is_empty() {
                break;
            }

            if suspended.is_none() {
                suspended = Some(suspended_models(self.store.as_ref()).await?);
            }
            let Some(suspended) = suspended.as_ref() else {
                break;
            };

            for job in &page {
                let Some((model, method)) = self.choose(job, suspended).await else {
                    skipped += 1;
                    continue;
                };
                match self.assign(job, &model, method).await {
                    Ok(true) => assigned += 1,
                    // Claimed or reassigned meanwhile; no longer in the queue.
                    Ok(false) => debug!(job_id = %job.id, "Job left QUEUED before assignment"),
                    Err(e) => {
                        error!(job_id = %job.id, "Failed to assign job: {e}");
                        skipped += 1;
                    }
                }
            }
        }

        if skipped > 0 {
            debug!(skipped, assigned, "Jobs left queued this cycle");
        }
        Ok(assigned)
    }

    async fn assign(&self, job: &Job, model: &str, method: AssignMethod) -> Result<bool, DatabaseError> {
        if !self
            .store
            .assign_job(job.id, model, &[JobStatus::Queued])
            .await?
        {
            return Ok(false);
        }
        self.store
            .append_job_event(
                job.id,
                EventType::Assigned,
                &json!({"assigned_model": model, "method": method}),
            )
            .await?;
        info!(job_id = %job.id, model = %model, method = ?method, "Assigned job");
        Ok(true)
    }

    /// Spawn the scheduling loop.
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(tick = ?self.tick, batch = self.batch_size, "Scheduler started");

            while !shutdown.is_triggered() {
                if let Err(e) = self.run_cycle().await {
                    error!("Scheduler cycle failed: {e}");
                }
                if !shutdown.sleep(self.tick).await {
                    break;
                }
            }

            info!("Scheduler stopped");
        })
    }
}

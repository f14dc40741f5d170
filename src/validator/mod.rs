//! Post-hoc validator: one run record per COMPLETED job.
//!
//! Runs on every node regardless of leadership. Racing validators are safe;
//! the store keeps at most one run per job.

pub mod scoring;

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ValidatorConfig;
use crate::error::DatabaseError;
use crate::governance::Ledger;
use crate::jobs::{EventType, Job};
use crate::shutdown::Shutdown;
use crate::store::{Database, NewRun};

pub use scoring::{Signals, score_from_signals};

/// Confidence recorded when the report carried none.
const DEFAULT_CONFIDENCE: f64 = 0.9;

pub struct Validator {
    store: Arc<dyn Database>,
    ledger: Ledger,
    config: ValidatorConfig,
}

/// Fields read back from a job's completion report.
#[derive(Debug, Default)]
struct ReportFacts {
    confidence: Option<f64>,
    estimated_cost: Option<Decimal>,
}

fn parse_cost(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => n.as_f64().and_then(Decimal::from_f64),
        _ => None,
    }
}

impl Validator {
    pub fn new(store: Arc<dyn Database>, config: ValidatorConfig) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            store,
            config,
        }
    }

    async fn report_facts(&self, job: &Job) -> Result<ReportFacts, DatabaseError> {
        let events = self.store.job_events(job.id).await?;
        let Some(report) = events
            .iter()
            .rev()
            .find(|e| e.event_type == EventType::Completed)
            .and_then(|e| e.details.get("details"))
        else {
            return Ok(ReportFacts::default());
        };
        Ok(ReportFacts {
            confidence: report.get("confidence").and_then(|v| v.as_f64()),
            estimated_cost: report.get("estimated_cost").and_then(parse_cost),
        })
    }

    /// Score one job and write its run record. Returns whether a record was
    /// written; `false` if the model is unknown or another validator won.
    pub async fn validate(&self, job: &Job) -> Result<bool, DatabaseError> {
        let model_name = job.assigned_model.as_deref().unwrap_or_default();
        let Some(model) = self.store.get_model(model_name).await? else {
            warn!(job_id = %job.id, model = %model_name, "Model not registered, skipping validation");
            return Ok(false);
        };

        let artifacts = self.store.job_artifacts(job.id).await?;
        let has_result = artifacts.iter().any(|a| a.artifact_type == "result");
        let mut signals = Signals::baseline(has_result);
        for artifact in &artifacts {
            if let Some(overrides) = artifact.artifact.get("signals") {
                signals.apply(overrides);
            }
        }

        let penalties = self.ledger.penalty_count(job.id).await?;
        let score = score_from_signals(&signals, penalties as f64);
        let facts = self.report_facts(job).await?;

        let written = self
            .store
            .insert_run(&NewRun {
                model_id: model.id,
                job_id: job.id,
                project_id: job.project_id.clone(),
                success: true,
                confidence: facts.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                score,
                estimated_cost: facts.estimated_cost,
                details: json!({"signals": signals, "penalties": penalties}),
            })
            .await?;

        if written {
            info!(job_id = %job.id, model = %model_name, score, "Scored job");
        } else {
            debug!(job_id = %job.id, "Run already recorded");
        }
        Ok(written)
    }

    /// Validate one batch. Returns how many run records were written.
    pub async fn run_cycle(&self) -> Result<usize, DatabaseError> {
        let jobs = self.store.jobs_missing_run(self.config.batch_size).await?;
        if jobs.len() < self.config.batch_size {
            let orphaned = self.store.count_unattributed_completions().await?;
            if orphaned > 0 {
                warn!(orphaned, "Completed jobs waiting on an unregistered model");
            }
        }
        let mut written = 0;
        for job in &jobs {
            match self.validate(job).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => error!(job_id = %job.id, "Validation failed: {e}"),
            }
        }
        Ok(written)
    }

    /// Spawn the validation loop.
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.config.interval, batch = self.config.batch_size, "Validator started");

            while !shutdown.is_triggered() {
                if let Err(e) = self.run_cycle().await {
                    error!("Validator cycle failed: {e}");
                }
                if !shutdown.sleep(self.config.interval).await {
                    break;
                }
            }

            info!("Validator stopped");
        })
    }
}

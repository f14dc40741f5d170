//! Watchdog: periodic anomaly scans over jobs and runs.
//!
//! Three independent rules per cycle (stalled jobs, cost spikes, elevated
//! failure rate). Each alert is written to the audit log first, then
//! forwarded to the control API's `/alerts`; forwarding is best-effort.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::ControlClient;
use crate::config::WatchdogConfig;
use crate::error::DatabaseError;
use crate::governance::{ACTOR_AUDITOR, ALERT_ACTION, Alert, Severity};
use crate::shutdown::Shutdown;
use crate::store::Database;

pub const REASON_STALLED: &str = "stalled_job";
pub const REASON_COST_SPIKE: &str = "cost_spike";
pub const REASON_FAILURE_RATE: &str = "high_failure_rate";

/// `now - d`, saturating at the earliest representable instant.
fn ago(d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| Utc::now().checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub struct Watchdog {
    store: Arc<dyn Database>,
    client: ControlClient,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(store: Arc<dyn Database>, config: WatchdogConfig) -> Self {
        let client = ControlClient::new(&config.manager_url, config.forward_timeout);
        Self {
            store,
            client,
            config,
        }
    }

    /// IN_PROGRESS jobs older than the stall threshold.
    async fn scan_stalled(&self) -> Result<Vec<Alert>, DatabaseError> {
        let jobs = self.store.stalled_jobs(ago(self.config.stall_after)).await?;
        Ok(jobs
            .into_iter()
            .map(|job| Alert {
                job_id: Some(job.id),
                severity: Severity::High,
                reason: REASON_STALLED.to_string(),
                message: format!("Job {} stalled since {}", job.id, job.created_at.to_rfc3339()),
            })
            .collect())
    }

    /// Runs in the window costing more than the threshold, once per job.
    async fn scan_cost_spikes(&self) -> Result<Vec<Alert>, DatabaseError> {
        let runs = self.store.runs_since(ago(self.config.window)).await?;
        let mut alerts = Vec::new();
        for run in runs {
            let Some(cost) = run.estimated_cost else {
                continue;
            };
            if cost <= self.config.cost_threshold {
                continue;
            }
            if self.store.alert_exists(run.job_id, REASON_COST_SPIKE).await? {
                debug!(job_id = %run.job_id, "Cost spike already reported");
                continue;
            }
            alerts.push(Alert {
                job_id: Some(run.job_id),
                severity: Severity::Medium,
                reason: REASON_COST_SPIKE.to_string(),
                message: format!("High cost detected: ${cost}"),
            });
        }
        Ok(alerts)
    }

    /// One system-level alert per identity with too many failed jobs.
    async fn scan_failure_rate(&self) -> Result<Vec<Alert>, DatabaseError> {
        let counts = self.store.failure_counts(ago(self.config.window)).await?;
        Ok(counts
            .into_iter()
            .filter(|(_, failures)| *failures > self.config.failure_threshold)
            .map(|(model, failures)| Alert {
                job_id: None,
                severity: Severity::High,
                reason: REASON_FAILURE_RATE.to_string(),
                message: format!("Model {model} failed {failures} jobs in last hour"),
            })
            .collect())
    }

    async fn emit(&self, alert: &Alert) {
        match serde_json::to_value(alert) {
            Ok(details) => {
                if let Err(e) = self
                    .store
                    .append_audit(ACTOR_AUDITOR, ALERT_ACTION, &details)
                    .await
                {
                    error!(reason = %alert.reason, "Failed to record alert: {e}");
                }
            }
            Err(e) => error!(reason = %alert.reason, "Failed to encode alert: {e}"),
        }

        match self.client.post_alert(alert, self.config.forward_timeout).await {
            Ok(()) => info!(reason = %alert.reason, severity = %alert.severity, "Alert sent: {}", alert.message),
            Err(e) => warn!(reason = %alert.reason, "Failed to forward alert: {e}"),
        }
    }

    /// Run every rule once. Returns the alerts emitted.
    pub async fn run_cycle(&self) -> Vec<Alert> {
        let mut emitted = Vec::new();
        let scans = [
            (REASON_STALLED, self.scan_stalled().await),
            (REASON_COST_SPIKE, self.scan_cost_spikes().await),
            (REASON_FAILURE_RATE, self.scan_failure_rate().await),
        ];
        for (rule, result) in scans {
            match result {
                Ok(alerts) => {
                    for alert in alerts {
                        self.emit(&alert).await;
                        emitted.push(alert);
                    }
                }
                Err(e) => error!(rule, "Watchdog scan failed: {e}"),
            }
        }
        emitted
    }

    /// Spawn the scan loop.
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.config.interval, manager = %self.client.base_url(), "Watchdog started");

            while !shutdown.is_triggered() {
                let alerts = self.run_cycle().await;
                debug!(alerts = alerts.len(), "Watchdog scan finished");
                if !shutdown.sleep(self.config.interval).await {
                    break;
                }
            }

            info!("Watchdog stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Job;
    use crate::store::{LibSqlBackend, NewRun};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            // Nothing listens here; forwarding fails fast and is only logged.
            manager_url: "http://127.0.0.1:9".into(),
            forward_timeout: Duration::from_millis(300),
            ..WatchdogConfig::default()
        }
    }

    async fn watchdog() -> (Arc<dyn Database>, Watchdog) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        (db.clone(), Watchdog::new(db, config()))
    }

    async fn run_with_cost(db: &Arc<dyn Database>, cost: Decimal) -> Job {
        let model = db.upsert_model("alpha", "stub", None).await.unwrap();
        let job = Job::queued("Employee", None);
        db.insert_job(&job).await.unwrap();
        db.insert_run(&NewRun {
            model_id: model.id,
            job_id: job.id,
            project_id: None,
            success: true,
            confidence: 0.9,
            score: 0.5,
            estimated_cost: Some(cost),
            details: json!({}),
        })
        .await
        .unwrap();
        job
    }

    #[tokio::test]
    async fn stalled_job_reported_each_cycle() {
        let (db, watchdog) = watchdog().await;
        let mut old = Job::queued("Employee", None);
        old.created_at = Utc::now() - chrono::Duration::minutes(6);
        db.insert_job(&old).await.unwrap();
        db.claim_job(old.id, "alpha").await.unwrap();

        let mut fresh = Job::queued("Employee", None);
        fresh.created_at = Utc::now() - chrono::Duration::minutes(1);
        db.insert_job(&fresh).await.unwrap();
        db.claim_job(fresh.id, "alpha").await.unwrap();

        let first = watchdog.run_cycle().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].job_id, Some(old.id));
        assert_eq!(first[0].severity, Severity::High);
        assert_eq!(first[0].reason, REASON_STALLED);

        // No cross-cycle dedup for stalled jobs.
        assert_eq!(watchdog.run_cycle().await.len(), 1);
    }

    #[tokio::test]
    async fn cost_spike_reported_once() {
        let (db, watchdog) = watchdog().await;
        let expensive = run_with_cost(&db, dec!(1.50)).await;

        let first = watchdog.run_cycle().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].job_id, Some(expensive.id));
        assert_eq!(first[0].severity, Severity::Medium);
        assert!(db.alert_exists(expensive.id, REASON_COST_SPIKE).await.unwrap());

        assert!(watchdog.run_cycle().await.is_empty());
    }

    #[tokio::test]
    async fn threshold_cost_is_not_a_spike() {
        let (db, watchdog) = watchdog().await;
        run_with_cost(&db, dec!(1.00)).await;
        assert!(watchdog.run_cycle().await.is_empty());
    }

    #[tokio::test]
    async fn failure_rate_needs_more_than_three() {
        let (db, watchdog) = watchdog().await;
        let fail = |worker: &'static str| {
            let db = db.clone();
            async move {
                let job = Job::queued("Employee", None);
                db.insert_job(&job).await.unwrap();
                db.claim_job(job.id, worker).await.unwrap();
                db.finish_job(job.id, false).await.unwrap();
            }
        };
        for _ in 0..3 {
            fail("steady").await;
        }
        for _ in 0..4 {
            fail("flaky").await;
        }

        let alerts = watchdog.run_cycle().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].job_id, None);
        assert_eq!(alerts[0].reason, REASON_FAILURE_RATE);
        assert!(alerts[0].message.contains("flaky"));
    }

    #[tokio::test]
    async fn alerts_land_in_audit_log() {
        let (db, watchdog) = watchdog().await;
        run_with_cost(&db, dec!(2)).await;
        watchdog.run_cycle().await;

        let entries = db.audit_after(0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor, ACTOR_AUDITOR);
        assert_eq!(entries[0].action, ALERT_ACTION);
        assert_eq!(entries[0].details["reason"], REASON_COST_SPIKE);
    }
}

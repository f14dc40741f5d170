//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file, in-memory, and remote (sqld / Turso) databases.
//! Every mutation is a single statement, so the shared connection never
//! holds a transaction open across awaits.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::DatabaseError;
use crate::governance::ledger::PerformanceRecord;
use crate::governance::{Penalty, Severity};
use crate::jobs::model::{Artifact, EventType, Job, JobEvent, JobFilter, JobStatus};
use crate::store::migrations;
use crate::store::traits::{AuditEntry, Database, Model, ModelRun, NewRun};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open the database named by the store configuration and run migrations.
    ///
    /// `libsql://`, `http://` and `https://` URLs connect to a remote server;
    /// anything else is treated as a local file path.
    pub async fn connect(config: &StoreConfig) -> Result<Self, DatabaseError> {
        let url = config.url.as_str();
        if url.starts_with("libsql://") || url.starts_with("http://") || url.starts_with("https://")
        {
            let token = config
                .auth_token
                .as_ref()
                .map(|t| t.expose_secret().to_string())
                .unwrap_or_default();
            Self::new_remote(url, token).await
        } else {
            Self::new_local(Path::new(url)).await
        }
    }

    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Connect to a remote libSQL server and run migrations.
    pub async fn new_remote(url: &str, auth_token: String) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to connect to {url}: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(url, "Remote database connected");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a query expected to return a single integer.
    async fn query_i64(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}"))),
            Ok(None) => Err(DatabaseError::Query(format!("{op}: no row returned"))),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn query_jobs(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_job(&row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping job row: {e}"),
            }
        }
        Ok(jobs)
    }

    async fn query_performance(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<PerformanceRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_performance(&row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping performance row: {e}"),
            }
        }
        Ok(records)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so lexical order in SQL matches time order.
pub(crate) fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_json(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
}

/// Column value that does not parse into its domain type.
fn bad_column(raw: &str, e: impl std::fmt::Display) -> libsql::Error {
    libsql::Error::ToSqlConversionFailure(format!("{raw}: {e}").into())
}

fn parse_uuid(s: &str) -> Result<Uuid, libsql::Error> {
    Uuid::parse_str(s).map_err(|e| bad_column(s, e))
}

/// SQL `IN (...)` body for a set of statuses. Values come from the enum, never user input.
fn status_list(statuses: &[JobStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a Job.
///
/// Column order matches JOB_COLUMNS:
/// 0:id, 1:project_id, 2:role, 3:assigned_model, 4:status, 5:created_at, 6:completed_at
fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let completed_str: Option<String> = row.get(6).ok();

    let status = JobStatus::from_str(&status_str).map_err(|e| bad_column(&status_str, e))?;

    Ok(Job {
        id: parse_uuid(&id_str)?,
        project_id: row.get(1).ok(),
        role: row.get(2)?,
        assigned_model: row.get(3).ok(),
        status,
        created_at: parse_datetime(&created_str),
        completed_at: parse_optional_datetime(&completed_str),
    })
}

/// Column order matches EVENT_COLUMNS.
fn row_to_event(row: &libsql::Row) -> Result<JobEvent, libsql::Error> {
    let job_id: String = row.get(1)?;
    let event_type: String = row.get(2)?;
    let details: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    Ok(JobEvent {
        id: row.get(0)?,
        job_id: parse_uuid(&job_id)?,
        event_type: EventType::from_str(&event_type).map_err(|e| bad_column(&event_type, e))?,
        details: parse_json(&details),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order matches MODEL_COLUMNS.
fn row_to_model(row: &libsql::Row) -> Result<Model, libsql::Error> {
    let last_warning: Option<String> = row.get(6).ok();
    let created_str: String = row.get(9)?;

    Ok(Model {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        endpoint: row.get(3).ok(),
        is_active: row.get::<i64>(4)? != 0,
        warnings_count: row.get(5)?,
        last_warning_at: parse_optional_datetime(&last_warning),
        suspended: row.get::<i64>(7)? != 0,
        suspension_reason: row.get(8).ok(),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order matches ARTIFACT_COLUMNS.
fn row_to_artifact(row: &libsql::Row) -> Result<Artifact, libsql::Error> {
    let job_id: String = row.get(1)?;
    let artifact: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(Artifact {
        id: row.get(0)?,
        job_id: parse_uuid(&job_id)?,
        model_id: row.get(2)?,
        artifact_type: row.get(3)?,
        artifact: parse_json(&artifact),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order matches RUN_COLUMNS.
fn row_to_run(row: &libsql::Row) -> Result<ModelRun, libsql::Error> {
    let job_id: String = row.get(2)?;
    let cost: Option<String> = row.get(7).ok();
    let details: String = row.get(8)?;
    let created_str: String = row.get(9)?;

    Ok(ModelRun {
        id: row.get(0)?,
        model_id: row.get(1)?,
        job_id: parse_uuid(&job_id)?,
        project_id: row.get(3).ok(),
        success: row.get::<i64>(4)? != 0,
        confidence: row.get(5)?,
        score: row.get(6)?,
        estimated_cost: cost.and_then(|c| Decimal::from_str(&c).ok()),
        details: parse_json(&details),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order matches PERFORMANCE_COLUMNS.
fn row_to_performance(row: &libsql::Row) -> Result<PerformanceRecord, libsql::Error> {
    let job_id: String = row.get(2)?;
    let penalties: String = row.get(4)?;
    let severity: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(PerformanceRecord {
        id: row.get(0)?,
        model_name: row.get(1)?,
        job_id: parse_uuid(&job_id)?,
        score: row.get(3)?,
        penalties: serde_json::from_str::<Vec<Penalty>>(&penalties).unwrap_or_default(),
        severity: Severity::from_str(&severity).unwrap_or(Severity::Low),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order matches AUDIT_COLUMNS.
fn row_to_audit(row: &libsql::Row) -> Result<AuditEntry, libsql::Error> {
    let details: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    Ok(AuditEntry {
        id: row.get(0)?,
        actor: row.get(1)?,
        action: row.get(2)?,
        details: parse_json(&details),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const JOB_COLUMNS: &str = "id, project_id, role, assigned_model, status, created_at, completed_at";

const EVENT_COLUMNS: &str = "id, job_id, event_type, details, created_at";

const MODEL_COLUMNS: &str = "id, name, kind, endpoint, is_active, warnings_count, last_warning_at, suspended, suspension_reason, created_at";

const ARTIFACT_COLUMNS: &str = "id, job_id, model_id, artifact_type, artifact, created_at";

const RUN_COLUMNS: &str = "id, model_id, job_id, project_id, success, confidence, score, estimated_cost, details, created_at";

const PERFORMANCE_COLUMNS: &str =
    "id, model_name, job_id, score, penalties, error_severity, created_at";

const AUDIT_COLUMNS: &str = "id, actor, action, details, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.query_i64("ping", "SELECT 1", ()).await.map(|_| ())
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    job.id.to_string(),
                    opt_text(job.project_id.as_deref()),
                    job.role.as_str(),
                    opt_text(job.assigned_model.as_deref()),
                    job.status.as_str(),
                    fmt_datetime(&job.created_at),
                    opt_text(job.completed_at.map(|t| fmt_datetime(&t)).as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;
        debug!(job_id = %job.id, role = %job.role, "Inserted job");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let job = row_to_job(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_job row parse: {e}")))?;
                Ok(Some(job))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
        // LIMIT -1 means unbounded in SQLite.
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = filter.offset.unwrap_or(0) as i64;
        self.query_jobs(
            "list_jobs",
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR assigned_model = ?2)
                 ORDER BY created_at ASC, rowid ASC LIMIT ?3 OFFSET ?4"
            ),
            params![
                opt_text(filter.status.map(|s| s.as_str())),
                opt_text(filter.assigned_model.as_deref()),
                limit,
                offset,
            ],
        )
        .await
    }

    async fn assign_job(
        &self,
        id: Uuid,
        model: &str,
        from: &[JobStatus],
    ) -> Result<bool, DatabaseError> {
        let from: Vec<JobStatus> = from
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(JobStatus::Assigned))
            .collect();
        if from.is_empty() {
            return Ok(false);
        }
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE jobs SET status = 'ASSIGNED', assigned_model = ?2
                     WHERE id = ?1 AND status IN ({})",
                    status_list(&from)
                ),
                params![id.to_string(), model],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("assign_job: {e}")))?;
        Ok(changed == 1)
    }

    async fn claim_job(&self, id: Uuid, worker: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE jobs SET status = 'IN_PROGRESS', assigned_model = ?2
                     WHERE id = ?1 AND status IN ({})",
                    status_list(&JobStatus::sources_of(JobStatus::InProgress))
                ),
                params![id.to_string(), worker],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_job: {e}")))?;
        Ok(changed == 1)
    }

    async fn finish_job(&self, id: Uuid, success: bool) -> Result<bool, DatabaseError> {
        let target = if success {
            JobStatus::Completed
        } else {
            JobStatus::Submitted
        };
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE jobs SET status = ?2, completed_at = ?3
                     WHERE id = ?1 AND status IN ({})",
                    status_list(&JobStatus::sources_of(target))
                ),
                params![id.to_string(), target.as_str(), fmt_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("finish_job: {e}")))?;
        Ok(changed == 1)
    }

    async fn stalled_jobs(&self, before: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError> {
        self.query_jobs(
            "stalled_jobs",
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE status = 'IN_PROGRESS' AND created_at < ?1
                 ORDER BY created_at ASC"
            ),
            params![fmt_datetime(&before)],
        )
        .await
    }

    async fn failure_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT assigned_model, COUNT(*) FROM jobs
                 WHERE status = 'SUBMITTED' AND completed_at >= ?1 AND assigned_model IS NOT NULL
                 GROUP BY assigned_model ORDER BY assigned_model",
                params![fmt_datetime(&since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("failure_counts: {e}")))?;

        let mut counts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let model: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("failure_counts row parse: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("failure_counts row parse: {e}")))?;
            counts.push((model, count));
        }
        Ok(counts)
    }

    // ── Job events ──────────────────────────────────────────────────

    async fn append_job_event(
        &self,
        job_id: Uuid,
        event_type: EventType,
        details: &serde_json::Value,
    ) -> Result<i64, DatabaseError> {
        self.query_i64(
            "append_job_event",
            "INSERT INTO job_events (job_id, event_type, details, created_at)
             VALUES (?1, ?2, ?3, ?4) RETURNING id",
            params![
                job_id.to_string(),
                event_type.as_str(),
                details.to_string(),
                fmt_datetime(&Utc::now()),
            ],
        )
        .await
    }

    async fn job_events(&self, job_id: Uuid) -> Result<Vec<JobEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EVENT_COLUMNS} FROM job_events WHERE job_id = ?1 ORDER BY id ASC"),
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("job_events: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_event(&row) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping job event row: {e}"),
            }
        }
        Ok(events)
    }

    // ── Models ──────────────────────────────────────────────────────

    async fn upsert_model(
        &self,
        name: &str,
        kind: &str,
        endpoint: Option<&str>,
    ) -> Result<Model, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO models (name, kind, endpoint, is_active, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    kind = excluded.kind, endpoint = excluded.endpoint, is_active = 1",
                params![name, kind, opt_text(endpoint), fmt_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_model: {e}")))?;

        self.get_model(name)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "model".into(),
                id: name.to_string(),
            })
    }

    async fn get_model(&self, name: &str) -> Result<Option<Model>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MODEL_COLUMNS} FROM models WHERE name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_model: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let model = row_to_model(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_model row parse: {e}")))?;
                Ok(Some(model))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_model: {e}"))),
        }
    }

    async fn list_models(&self) -> Result<Vec<Model>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MODEL_COLUMNS} FROM models ORDER BY name ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_models: {e}")))?;

        let mut models = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_model(&row) {
                Ok(model) => models.push(model),
                Err(e) => warn!("Skipping model row: {e}"),
            }
        }
        Ok(models)
    }

    async fn record_warning(&self, name: &str) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "UPDATE models SET warnings_count = warnings_count + 1, last_warning_at = ?2
                 WHERE name = ?1
                 RETURNING warnings_count",
                params![name, fmt_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_warning: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("record_warning row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("record_warning: {e}"))),
        }
    }

    async fn suspend_model(
        &self,
        name: &str,
        warnings_count: i64,
        reason: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE models SET suspended = 1, suspension_reason = ?3,
                    warnings_count = MAX(warnings_count, ?2), last_warning_at = ?4
                 WHERE name = ?1",
                params![name, warnings_count, reason, fmt_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("suspend_model: {e}")))?;
        Ok(())
    }

    async fn reinstate_model(&self, name: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE models SET suspended = 0, suspension_reason = NULL, warnings_count = 0
                 WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reinstate_model: {e}")))?;
        Ok(changed == 1)
    }

    // ── Artifacts ───────────────────────────────────────────────────

    async fn insert_artifact(
        &self,
        job_id: Uuid,
        model_id: i64,
        artifact_type: &str,
        artifact: &serde_json::Value,
    ) -> Result<i64, DatabaseError> {
        self.query_i64(
            "insert_artifact",
            "INSERT INTO model_artifacts (job_id, model_id, artifact_type, artifact, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
            params![
                job_id.to_string(),
                model_id,
                artifact_type,
                artifact.to_string(),
                fmt_datetime(&Utc::now()),
            ],
        )
        .await
    }

    async fn job_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ARTIFACT_COLUMNS} FROM model_artifacts WHERE job_id = ?1 ORDER BY id ASC"
                ),
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("job_artifacts: {e}")))?;

        let mut artifacts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_artifact(&row) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => warn!("Skipping artifact row: {e}"),
            }
        }
        Ok(artifacts)
    }

    // ── Runs ────────────────────────────────────────────────────────

    async fn jobs_missing_run(&self, limit: usize) -> Result<Vec<Job>, DatabaseError> {
        self.query_jobs(
            "jobs_missing_run",
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE status = 'COMPLETED'
                   AND NOT EXISTS (SELECT 1 FROM model_runs r WHERE r.job_id = jobs.id)
                   AND EXISTS (SELECT 1 FROM models m WHERE m.name = jobs.assigned_model)
                 ORDER BY created_at ASC LIMIT ?1"
            ),
            params![limit as i64],
        )
        .await
    }

    async fn count_unattributed_completions(&self) -> Result<i64, DatabaseError> {
        self.query_i64(
            "count_unattributed_completions",
            "SELECT COUNT(*) FROM jobs
             WHERE status = 'COMPLETED'
               AND NOT EXISTS (SELECT 1 FROM model_runs r WHERE r.job_id = jobs.id)
               AND NOT EXISTS (SELECT 1 FROM models m WHERE m.name = jobs.assigned_model)",
            (),
        )
        .await
    }

    async fn insert_run(&self, run: &NewRun) -> Result<bool, DatabaseError> {
        let result = self
            .conn()
            .execute(
                "INSERT INTO model_runs
                    (model_id, job_id, project_id, success, confidence, score, estimated_cost, details, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
                 WHERE NOT EXISTS (SELECT 1 FROM model_runs WHERE job_id = ?2)",
                params![
                    run.model_id,
                    run.job_id.to_string(),
                    opt_text(run.project_id.as_deref()),
                    run.success as i64,
                    run.confidence,
                    run.score,
                    opt_text(run.estimated_cost.map(|c| c.to_string()).as_deref()),
                    run.details.to_string(),
                    fmt_datetime(&Utc::now()),
                ],
            )
            .await;

        match result {
            Ok(changed) => Ok(changed == 1),
            // Lost a race with another validator; the unique index held.
            Err(e) if e.to_string().contains("UNIQUE constraint failed") => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("insert_run: {e}"))),
        }
    }

    async fn get_run(&self, job_id: Uuid) -> Result<Option<ModelRun>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM model_runs WHERE job_id = ?1"),
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_run: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let run = row_to_run(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_run row parse: {e}")))?;
                Ok(Some(run))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_run: {e}"))),
        }
    }

    async fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<ModelRun>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM model_runs WHERE created_at >= ?1 ORDER BY id ASC"
                ),
                params![fmt_datetime(&since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("runs_since: {e}")))?;

        let mut runs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_run(&row) {
                Ok(run) => runs.push(run),
                Err(e) => warn!("Skipping run row: {e}"),
            }
        }
        Ok(runs)
    }

    // ── Performance ledger ──────────────────────────────────────────

    async fn insert_performance(&self, record: &PerformanceRecord) -> Result<i64, DatabaseError> {
        let penalties = serde_json::to_string(&record.penalties)
            .map_err(|e| DatabaseError::Serialization(format!("insert_performance: {e}")))?;
        self.query_i64(
            "insert_performance",
            "INSERT INTO model_performance
                (model_name, job_id, score, penalties, error_severity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
            params![
                record.model_name.as_str(),
                record.job_id.to_string(),
                record.score,
                penalties,
                record.severity.as_str(),
                fmt_datetime(&record.created_at),
            ],
        )
        .await
    }

    async fn performance_history(
        &self,
        model_name: &str,
        limit: usize,
    ) -> Result<Vec<PerformanceRecord>, DatabaseError> {
        self.query_performance(
            "performance_history",
            &format!(
                "SELECT {PERFORMANCE_COLUMNS} FROM model_performance
                 WHERE model_name = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ),
            params![model_name, limit as i64],
        )
        .await
    }

    async fn job_performance(&self, job_id: Uuid) -> Result<Vec<PerformanceRecord>, DatabaseError> {
        self.query_performance(
            "job_performance",
            &format!(
                "SELECT {PERFORMANCE_COLUMNS} FROM model_performance
                 WHERE job_id = ?1 ORDER BY id ASC"
            ),
            params![job_id.to_string()],
        )
        .await
    }

    // ── Audit log ───────────────────────────────────────────────────

    async fn append_audit(
        &self,
        actor: &str,
        action: &str,
        details: &serde_json::Value,
    ) -> Result<i64, DatabaseError> {
        self.query_i64(
            "append_audit",
            "INSERT INTO audit_log (actor, action, details, created_at)
             VALUES (?1, ?2, ?3, ?4) RETURNING id",
            params![actor, action, details.to_string(), fmt_datetime(&Utc::now())],
        )
        .await
    }

    async fn max_audit_id(&self) -> Result<i64, DatabaseError> {
        self.query_i64("max_audit_id", "SELECT COALESCE(MAX(id), 0) FROM audit_log", ())
            .await
    }

    async fn audit_after(
        &self,
        cursor: i64,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
                ),
                params![cursor, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("audit_after: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_audit(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping audit row: {e}"),
            }
        }
        Ok(entries)
    }

    async fn alert_exists(&self, job_id: Uuid, reason: &str) -> Result<bool, DatabaseError> {
        let count = self
            .query_i64(
                "alert_exists",
                "SELECT COUNT(*) FROM audit_log
                 WHERE action = 'alert'
                   AND json_extract(details, '$.job_id') = ?1
                   AND json_extract(details, '$.reason') = ?2",
                params![job_id.to_string(), reason],
            )
            .await?;
        Ok(count > 0)
    }

    // ── Leadership ──────────────────────────────────────────────────

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DatabaseError::Query(format!("try_acquire_lease: {e}")))?;
        let changed = self
            .conn()
            .execute(
                "INSERT INTO leader_locks (name, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    holder = excluded.holder, expires_at = excluded.expires_at
                 WHERE leader_locks.holder = excluded.holder OR leader_locks.expires_at < ?4",
                params![name, holder, fmt_datetime(&(now + ttl)), fmt_datetime(&now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("try_acquire_lease: {e}")))?;
        Ok(changed == 1)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM leader_locks WHERE name = ?1 AND holder = ?2",
                params![name, holder],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_lease: {e}")))?;
        Ok(())
    }
}

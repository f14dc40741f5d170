//! Control API: axum routes shared by workers, intake, and governance.

pub mod client;
pub mod events;
pub mod governance;
pub mod jobs;
pub mod models;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{DatabaseError, Error, JobError};
use crate::governance::Accountant;
use crate::jobs::JobService;
use crate::routing::Catalog;
use crate::shutdown::Shutdown;
use crate::store::Database;

pub use client::ControlClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Database>,
    pub jobs: Arc<JobService>,
    /// Serves `POST /evaluate`.
    pub accountant: Arc<Accountant>,
    /// Serves `POST /route`.
    pub catalog: Arc<Catalog>,
    /// Audit-log polling cadence for `GET /events`.
    pub event_poll: Duration,
    /// Ends open event streams so graceful shutdown can finish.
    pub shutdown: Shutdown,
}

/// Build the full Control API router.
pub fn routes(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(governance::health))
        .route("/ready", get(governance::ready))
        .route("/jobs-batch", post(jobs::create_batch))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/events", get(jobs::job_events))
        .route("/jobs/{id}/assign", post(jobs::assign_job))
        .route("/jobs/{id}/claim", post(jobs::claim_job))
        .route("/jobs/{id}/complete", post(jobs::complete_job))
        .route("/models", get(models::list_models))
        .route("/models/{name}/register", post(models::register_model))
        .route("/models/{name}/artifact", post(models::upload_artifact))
        .route("/models/{name}/reinstate", post(models::reinstate_model))
        .route("/models/{name}/performance", get(models::performance))
        .route("/alerts", post(governance::take_alert))
        .route("/evaluate", post(governance::evaluate))
        .route("/route", post(governance::route))
        .route("/events", get(events::event_stream))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin: {e}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

// ── Errors ──────────────────────────────────────────────────────────────

/// Handler error rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            Self::Conflict(m) => (StatusCode::CONFLICT, "conflict", m),
            Self::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", m),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, "Request failed: {message}");
        }
        (
            status,
            Json(serde_json::json!({"error": message, "code": code})),
        )
            .into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { .. } => Self::NotFound(e.to_string()),
            DatabaseError::Constraint(_) => Self::Conflict(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Job(job) => match job {
                JobError::NotFound { .. } | JobError::UnknownModel { .. } => {
                    Self::NotFound(job.to_string())
                }
                JobError::InvalidTransition { .. } | JobError::ModelSuspended { .. } => {
                    Self::Conflict(job.to_string())
                }
            },
            Error::Database(db) => db.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Parse a job id path segment.
pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid job ID: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_errors_map_to_status_codes() {
        let id = Uuid::new_v4();
        let cases = [
            (Error::from(JobError::NotFound { id }), StatusCode::NOT_FOUND),
            (
                Error::from(JobError::InvalidTransition {
                    id,
                    state: crate::jobs::JobStatus::InProgress,
                    target: crate::jobs::JobStatus::InProgress,
                }),
                StatusCode::CONFLICT,
            ),
            (
                Error::from(JobError::ModelSuspended { name: "m".into() }),
                StatusCode::CONFLICT,
            ),
            (
                Error::from(DatabaseError::Query("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).parts().0, status);
        }
    }

    async fn app(origins: &[String]) -> Router {
        let db: Arc<dyn Database> =
            Arc::new(crate::store::LibSqlBackend::new_memory().await.unwrap());
        let accountant = Arc::new(Accountant::new(db.clone()));
        let state = AppState {
            jobs: Arc::new(JobService::new(db.clone(), accountant.clone())),
            store: db,
            accountant,
            catalog: Arc::new(Catalog::default()),
            event_poll: Duration::from_millis(50),
            shutdown: Shutdown::new(),
        };
        routes(state, origins)
    }

    #[tokio::test]
    async fn cors_allows_listed_origin() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let app = app(&["http://dashboard.local".to_string()]).await;
        let resp = app
            .oneshot(
                Request::get("/health")
                    .header("origin", "http://dashboard.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "http://dashboard.local"
        );
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let resp = app(&[])
            .await
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_ids_are_rejected() {
        assert!(parse_id("not-a-uuid").is_err());
        assert!(parse_id(&Uuid::new_v4().to_string()).is_ok());
    }
}

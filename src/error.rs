//! Error types for the fleet control plane.

use std::time::Duration;

use uuid::Uuid;

use crate::jobs::model::JobStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Job lifecycle errors. These are protocol violations, surfaced to the
/// caller and never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} is {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: JobStatus,
        target: JobStatus,
    },

    #[error("Model {name} is not registered")]
    UnknownModel { name: String },

    #[error("Model {name} is suspended")]
    ModelSuspended { name: String },
}

/// Errors from HTTP calls to the control API and peer services.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url} rejected the request ({status}): {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

impl ClientError {
    /// Map a reqwest error for the given URL.
    pub fn from_reqwest(url: &str, timeout: Duration, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else if e.is_decode() {
            Self::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            }
        } else {
            Self::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    /// Whether the remote side answered with 409 Conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Rejected { status: 409, .. })
    }
}

/// Generation adapter errors. Adapters fold these into their output payload;
/// they never cross the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Backend {backend} request failed: {reason}")]
    RequestFailed { backend: String, reason: String },

    #[error("Backend {backend} returned status {status}: {body}")]
    BadStatus {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("Backend {backend} timed out after {timeout:?}")]
    Timeout { backend: String, timeout: Duration },

    #[error("Backend {backend} is not configured: {reason}")]
    NotConfigured { backend: String, reason: String },

    #[error("Invalid response from {backend}: {reason}")]
    InvalidResponse { backend: String, reason: String },
}

/// Job workspace errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot of job {job_id} failed: {reason}")]
    SnapshotFailed { job_id: Uuid, reason: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

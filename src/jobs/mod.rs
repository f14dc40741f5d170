//! Jobs: data model, state machine, and the lifecycle operations the
//! control API exposes.

pub mod model;
pub mod service;

pub use model::{Artifact, EventType, Job, JobEvent, JobFilter, JobStatus};
pub use service::{BatchCreated, BatchRequest, Completion, JobService};

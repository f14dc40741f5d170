//! Job lifecycle state machine and the per-job event trail.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for the scheduler.
    Queued,
    /// A worker identity has been chosen.
    Assigned,
    /// A worker has claimed the job and is executing it.
    InProgress,
    /// The worker reported success.
    Completed,
    /// The worker reported failure. Terminal; never re-queued.
    Submitted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Queued,
        Self::Assigned,
        Self::InProgress,
        Self::Completed,
        Self::Submitted,
    ];

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            // Scheduler or operator assignment, including manual reassign
            (Queued, Assigned) | (Assigned, Assigned) |
            // Claim, either after assignment or directly from the queue
            (Assigned, InProgress) | (Queued, InProgress) |
            // Report
            (InProgress, Completed) | (InProgress, Submitted)
        )
    }

    /// All states from which `target` is reachable in one step.
    pub fn sources_of(target: JobStatus) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Submitted)
    }

    /// Whether a worker identity is bound to the job in this state.
    pub fn has_assignee(&self) -> bool {
        !matches!(self, Self::Queued)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Submitted => "SUBMITTED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "ASSIGNED" => Ok(Self::Assigned),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "SUBMITTED" => Ok(Self::Submitted),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A unit of assignable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Option<String>,
    pub role: String,
    /// Set exactly when the status has an assignee.
    pub assigned_model: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly queued job for the given role.
    pub fn queued(role: impl Into<String>, project_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            role: role.into(),
            assigned_model: None,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Kind of entry in a job's audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Assigned,
    AssignedManual,
    Claimed,
    Completed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Assigned => "assigned",
            Self::AssignedManual => "assigned_manual",
            Self::Claimed => "claimed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "assigned" => Ok(Self::Assigned),
            "assigned_manual" => Ok(Self::AssignedManual),
            "claimed" => Ok(Self::Claimed),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Append-only record of something that happened to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: Uuid,
    pub event_type: EventType,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Structured output a worker uploads for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub job_id: Uuid,
    pub model_id: i64,
    pub artifact_type: String,
    pub artifact: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Filter for job listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub assigned_model: Option<String>,
    pub limit: Option<usize>,
    /// Rows to skip, oldest first.
    pub offset: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachable_transitions() {
        use JobStatus::*;
        let allowed = [
            (Queued, Assigned),
            (Assigned, InProgress),
            (Queued, InProgress),
            (InProgress, Completed),
            (InProgress, Submitted),
            (Assigned, Assigned),
        ];
        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in JobStatus::ALL {
            assert!(!JobStatus::Completed.can_transition_to(to));
            assert!(!JobStatus::Submitted.can_transition_to(to));
        }
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
    }

    #[test]
    fn sources_of_claim_and_assign() {
        assert_eq!(
            JobStatus::sources_of(JobStatus::InProgress),
            vec![JobStatus::Queued, JobStatus::Assigned]
        );
        assert_eq!(
            JobStatus::sources_of(JobStatus::Assigned),
            vec![JobStatus::Queued, JobStatus::Assigned]
        );
        assert_eq!(
            JobStatus::sources_of(JobStatus::Completed),
            vec![JobStatus::InProgress]
        );
        assert!(JobStatus::sources_of(JobStatus::Queued).is_empty());
    }

    #[test]
    fn status_wire_format() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let parsed: JobStatus = serde_json::from_str("\"SUBMITTED\"").unwrap();
        assert_eq!(parsed, JobStatus::Submitted);
        assert_eq!("in_progress".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
        assert!("FAILED".parse::<JobStatus>().is_err());
    }

    #[test]
    fn queued_job_has_no_assignee() {
        let job = Job::queued("Employee", None);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.assigned_model.is_none());
        assert!(!job.status.has_assignee());
    }

    #[test]
    fn event_type_names() {
        assert_eq!(EventType::AssignedManual.to_string(), "assigned_manual");
        assert_eq!("claimed".parse::<EventType>().unwrap(), EventType::Claimed);
    }
}

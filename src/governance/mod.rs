//! Governance: scoring completed work and acting on the result.

pub mod accountant;
pub mod classifier;
pub mod ledger;
pub mod scorer;
pub mod strikes;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use accountant::{Accountant, Evaluation, EvaluationRequest, Evaluator, HttpEvaluator};
pub use classifier::{Action, Severity};
pub use ledger::{Ledger, PerformanceRecord};
pub use scorer::{Penalty, ScoreResult};
pub use strikes::StrikeOutcome;

/// Audit-log actor names.
pub const ACTOR_MANAGER: &str = "manager";
pub const ACTOR_ACCOUNTANT: &str = "accountant";
pub const ACTOR_AUDITOR: &str = "auditor";
pub const ACTOR_OPERATOR: &str = "operator";

/// Audit-log action for alerts.
pub const ALERT_ACTION: &str = "alert";

/// An anomaly report, stored in the audit log and sent to `POST /alerts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `None` for system-level alerts.
    pub job_id: Option<Uuid>,
    pub severity: Severity,
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

//! Accountant: score, classify, ledger.
//!
//! The control API reaches it through the [`Evaluator`] trait, either
//! in-process or over HTTP against another manager's `/evaluate`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClientError;
use crate::governance::classifier::{self, Action, Severity};
use crate::governance::ledger::Ledger;
use crate::governance::scorer::{self, DEFAULT_MIN_LENGTH, Penalty};
use crate::store::Database;

/// Body of `POST /evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub model_name: String,
    pub job_id: Uuid,
    /// Task payload; `min_length` is read from here.
    #[serde(default)]
    pub task: serde_json::Value,
    /// Report details; `output` and `confidence` are read from here.
    #[serde(default)]
    pub model_output: serde_json::Value,
}

impl EvaluationRequest {
    /// Output text, falling back to the excerpt for terse reports.
    fn output(&self) -> &str {
        self.model_output
            .get("output")
            .and_then(|v| v.as_str())
            .or_else(|| {
                self.model_output
                    .get("output_excerpt")
                    .and_then(|v| v.as_str())
            })
            .unwrap_or("")
    }

    fn confidence(&self) -> f64 {
        self.model_output
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    fn min_length(&self) -> Option<usize> {
        self.task
            .get("min_length")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
    }
}

/// Response of `POST /evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub penalties: Vec<Penalty>,
    pub severity: Severity,
    pub action: Action,
    pub message: String,
}

/// Scoring service boundary.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, ClientError>;
}

/// In-process accountant backed by the store's ledger.
pub struct Accountant {
    ledger: Ledger,
    default_min_length: usize,
}

impl Accountant {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self {
            ledger: Ledger::new(store),
            default_min_length: DEFAULT_MIN_LENGTH,
        }
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.default_min_length = min_length;
        self
    }

    /// Score, classify and ledger one report. Never fails; a ledger error
    /// is logged and the evaluation still returned.
    pub async fn assess(&self, request: &EvaluationRequest) -> Evaluation {
        let min_length = request.min_length().unwrap_or(self.default_min_length);
        let result = scorer::score(request.output(), request.confidence(), min_length);
        let severity = classifier::classify(&result);
        let action = Action::for_severity(severity);

        self.ledger
            .record(
                &request.model_name,
                request.job_id,
                result.score,
                &result.penalties,
                severity,
            )
            .await;

        tracing::info!(
            model = %request.model_name,
            job_id = %request.job_id,
            score = result.score,
            severity = %severity,
            "Evaluation recorded"
        );

        Evaluation {
            score: result.score,
            penalties: result.penalties,
            severity,
            action,
            message: "Evaluation recorded".to_string(),
        }
    }
}

#[async_trait]
impl Evaluator for Accountant {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, ClientError> {
        Ok(self.assess(request).await)
    }
}

/// Evaluator that calls a remote `/evaluate` endpoint.
pub struct HttpEvaluator {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpEvaluator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, ClientError> {
        let url = format!("{}/evaluate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&url, self.timeout, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Rejected {
                url,
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json::<Evaluation>()
            .await
            .map_err(|e| ClientError::from_reqwest(&url, self.timeout, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use serde_json::json;

    async fn accountant() -> (Arc<LibSqlBackend>, Accountant) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let accountant = Accountant::new(db.clone());
        (db, accountant)
    }

    fn request(output: serde_json::Value, task: serde_json::Value) -> EvaluationRequest {
        EvaluationRequest {
            model_name: "alpha".into(),
            job_id: Uuid::new_v4(),
            task,
            model_output: output,
        }
    }

    #[tokio::test]
    async fn empty_low_confidence_report_is_critical() {
        let (db, accountant) = accountant().await;
        let req = request(json!({"output": "", "confidence": 0.3}), json!({}));

        let eval = accountant.evaluate(&req).await.unwrap();
        assert_eq!(eval.score, 0.0);
        assert_eq!(eval.severity, Severity::Critical);
        assert_eq!(eval.action, Action::WarnOrSuspend);
        assert_eq!(
            eval.penalties,
            vec![Penalty::LowConfidence, Penalty::EmptyOutput]
        );

        let history = db.performance_history("alpha", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].job_id, req.job_id);
    }

    #[tokio::test]
    async fn clean_report_needs_no_action() {
        let (_db, accountant) = accountant().await;
        let req = request(
            json!({"output": "a perfectly adequate forty-character response here", "confidence": 0.9}),
            json!({"min_length": 20}),
        );
        let eval = accountant.evaluate(&req).await.unwrap();
        assert!((eval.score - 90.0).abs() < 1e-9);
        assert_eq!(eval.action, Action::None);
    }

    #[tokio::test]
    async fn task_min_length_overrides_default() {
        let (_db, accountant) = accountant().await;
        let req = request(
            json!({"output": "twenty-five characters ok", "confidence": 0.9}),
            json!({"min_length": 100}),
        );
        let eval = accountant.evaluate(&req).await.unwrap();
        assert_eq!(eval.penalties, vec![Penalty::TooShort]);
    }

    #[tokio::test]
    async fn excerpt_is_used_when_output_missing() {
        let (_db, accountant) = accountant().await;
        let req = request(
            json!({"output_excerpt": "a perfectly adequate excerpt of the output", "confidence": 0.9}),
            json!({}),
        );
        let eval = accountant.evaluate(&req).await.unwrap();
        assert!(eval.penalties.is_empty());
    }

    #[test]
    fn evaluation_wire_shape() {
        let eval = Evaluation {
            score: 0.0,
            penalties: vec![Penalty::EmptyOutput],
            severity: Severity::Critical,
            action: Action::WarnOrSuspend,
            message: "Evaluation recorded".into(),
        };
        let v = serde_json::to_value(&eval).unwrap();
        assert_eq!(v["penalties"][0], "empty_output");
        assert_eq!(v["severity"], "critical");
        assert_eq!(v["action"], "warn_or_suspend");
    }
}

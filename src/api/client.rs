//! HTTP client for the Control API, used by workers and the watchdog.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::ClientError;
use crate::governance::Alert;
use crate::jobs::{Job, JobEvent, JobStatus};

#[derive(Clone)]
pub struct ControlClient {
    base_url: String,
    timeout: Duration,
    report_timeout: Duration,
    client: reqwest::Client,
}

impl ControlClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            report_timeout: timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Timeout for completion reports, which wait on scoring.
    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        timeout: Duration,
    ) -> Result<T, ClientError> {
        let resp = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(url, timeout, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| ClientError::from_reqwest(url, timeout, e))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{path}", self.base_url);
        self.send(self.client.get(&url), &url, self.timeout).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, ClientError> {
        let url = format!("{}{path}", self.base_url);
        self.send(self.client.post(&url).json(body), &url, timeout)
            .await
    }

    /// `GET /jobs`, optionally narrowed to one assignee server-side.
    pub async fn list_jobs(
        &self,
        status: JobStatus,
        assigned_model: Option<&str>,
    ) -> Result<Vec<Job>, ClientError> {
        let url = format!("{}/jobs", self.base_url);
        let mut query = vec![("status", status.as_str().to_string())];
        if let Some(model) = assigned_model {
            query.push(("assigned_model", model.to_string()));
        }
        self.send(self.client.get(&url).query(&query), &url, self.timeout)
            .await
    }

    pub async fn job_events(&self, job_id: Uuid) -> Result<Vec<JobEvent>, ClientError> {
        self.get(&format!("/jobs/{job_id}/events")).await
    }

    /// Claim a job. A 409 means someone else holds it.
    pub async fn claim(&self, job_id: Uuid, worker_id: &str) -> Result<serde_json::Value, ClientError> {
        self.post(
            &format!("/jobs/{job_id}/claim"),
            &serde_json::json!({"worker_id": worker_id}),
            self.timeout,
        )
        .await
    }

    pub async fn register(
        &self,
        name: &str,
        kind: &str,
        endpoint: Option<&str>,
    ) -> Result<serde_json::Value, ClientError> {
        self.post(
            &format!("/models/{name}/register"),
            &serde_json::json!({"kind": kind, "endpoint": endpoint}),
            self.timeout,
        )
        .await
    }

    pub async fn upload_artifact(
        &self,
        model: &str,
        job_id: Uuid,
        artifact_type: &str,
        artifact: &serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        self.post(
            &format!("/models/{model}/artifact"),
            &serde_json::json!({
                "job_id": job_id,
                "artifact_type": artifact_type,
                "artifact": artifact,
            }),
            self.timeout,
        )
        .await
    }

    pub async fn complete(
        &self,
        job_id: Uuid,
        success: bool,
        details: &serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        self.post(
            &format!("/jobs/{job_id}/complete"),
            &serde_json::json!({"success": success, "details": details}),
            self.report_timeout,
        )
        .await
    }

    /// `POST /alerts` with an explicit timeout.
    pub async fn post_alert(&self, alert: &Alert, timeout: Duration) -> Result<(), ClientError> {
        let _: serde_json::Value = self.post("/alerts", alert, timeout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_manager_is_request_error() {
        let client = ControlClient::new("http://127.0.0.1:9/", Duration::from_millis(500));
        assert_eq!(client.base_url(), "http://127.0.0.1:9");
        let err = client.list_jobs(JobStatus::Assigned, None).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::RequestFailed { .. } | ClientError::Timeout { .. }
        ));
    }
}

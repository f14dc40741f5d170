//! Routing clients used by the scheduler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ClientError, DatabaseError};
use crate::routing::{Catalog, RouteRequest, RouteResponse};
use crate::store::Database;

/// Source of model selections. `Ok(None)` means no route is available.
#[async_trait]
pub trait ModelRouter: Send + Sync {
    async fn route(&self, request: &RouteRequest) -> Result<Option<RouteResponse>, ClientError>;
}

/// Names of every suspended registration.
pub async fn suspended_models(store: &dyn Database) -> Result<HashSet<String>, DatabaseError> {
    Ok(store
        .list_models()
        .await?
        .into_iter()
        .filter(|m| m.suspended)
        .map(|m| m.name)
        .collect())
}

/// Calls an external `POST /route`.
pub struct HttpRouter {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpRouter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelRouter for HttpRouter {
    async fn route(&self, request: &RouteRequest) -> Result<Option<RouteResponse>, ClientError> {
        let url = format!("{}/route", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&url, self.timeout, e))?;

        if !resp.status().is_success() {
            tracing::debug!(status = %resp.status(), "Router returned no selection");
            return Ok(None);
        }

        resp.json::<RouteResponse>()
            .await
            .map(Some)
            .map_err(|e| ClientError::from_reqwest(&url, self.timeout, e))
    }
}

/// Routes in-process from a capability catalog, skipping suspended models.
pub struct CatalogRouter {
    catalog: Arc<Catalog>,
    store: Arc<dyn Database>,
}

impl CatalogRouter {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn Database>) -> Self {
        Self { catalog, store }
    }
}

#[async_trait]
impl ModelRouter for CatalogRouter {
    async fn route(&self, request: &RouteRequest) -> Result<Option<RouteResponse>, ClientError> {
        let unavailable = suspended_models(self.store.as_ref())
            .await
            .map_err(|e| ClientError::RequestFailed {
                url: "catalog".into(),
                reason: e.to_string(),
            })?;
        Ok(self.catalog.select(request, &unavailable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn catalog_router_skips_suspended() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.upsert_model("employee_ollama", "ollama", None).await.unwrap();
        db.suspend_model("employee_ollama", 2, "test").await.unwrap();

        let router = CatalogRouter::new(Arc::new(Catalog::default()), db);
        let picked = router
            .route(&RouteRequest {
                requirements: vec!["code".into(), "fast".into()],
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.model, "employee_gemini");
    }

    #[tokio::test]
    async fn unreachable_http_router_is_an_error() {
        let router = HttpRouter::new("http://127.0.0.1:9", Duration::from_millis(500));
        let result = router.route(&RouteRequest::default()).await;
        assert!(result.is_err());
    }
}

//! Manager role: Control API, leader elector and leader-only scheduler.

pub mod leader;
pub mod router;
pub mod scheduler;

use std::sync::Arc;

use futures::future::join_all;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::ManagerConfig;
use crate::error::{ConfigError, Error};
use crate::governance::{Accountant, Evaluator, HttpEvaluator};
use crate::jobs::JobService;
use crate::routing::Catalog;
use crate::shutdown::Shutdown;
use crate::store::Database;

pub use leader::LeaderElector;
pub use router::{CatalogRouter, HttpRouter, ModelRouter};
pub use scheduler::Scheduler;

/// Everything the manager process runs, wired from one config.
pub struct Manager {
    pub state: AppState,
    pub elector: Arc<LeaderElector>,
    pub scheduler: Arc<Scheduler>,
    config: ManagerConfig,
}

impl Manager {
    pub fn build(store: Arc<dyn Database>, config: ManagerConfig) -> Result<Self, Error> {
        let accountant =
            Arc::new(Accountant::new(store.clone()).with_min_length(config.min_output_length));

        let evaluator: Arc<dyn Evaluator> = match &config.accountant_url {
            Some(url) => {
                info!(url = %url, "Using remote accountant");
                Arc::new(HttpEvaluator::new(url.as_str(), config.accountant_timeout))
            }
            None => accountant.clone(),
        };

        let catalog = Arc::new(Catalog::from_path(config.capabilities_path.as_deref())?);
        let router: Arc<dyn ModelRouter> = match &config.router_url {
            Some(url) => {
                info!(url = %url, "Using remote router");
                Arc::new(HttpRouter::new(url.as_str(), config.router_timeout))
            }
            None => Arc::new(CatalogRouter::new(catalog.clone(), store.clone())),
        };

        let elector = Arc::new(LeaderElector::new(
            store.clone(),
            config.node_id.as_str(),
            config.leader_poll,
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            elector.clone(),
            router,
            config.scheduler_tick,
            config.scheduler_batch,
        ));

        let state = AppState {
            jobs: Arc::new(JobService::new(store.clone(), evaluator)),
            store,
            accountant,
            catalog,
            event_poll: config.event_poll,
            shutdown: Shutdown::new(),
        };

        Ok(Self {
            state,
            elector,
            scheduler,
            config,
        })
    }

    /// Bind the configured address and serve until `shutdown`.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), Error> {
        let listener = TcpListener::bind(&self.config.bind)
            .await
            .map_err(ConfigError::Io)?;
        self.serve(listener, shutdown).await
    }

    /// Serve the Control API on `listener` and run the background loops
    /// until `shutdown`.
    pub async fn serve(mut self, listener: TcpListener, shutdown: Shutdown) -> Result<(), Error> {
        self.state.shutdown = shutdown.clone();
        let addr = listener.local_addr().map_err(ConfigError::Io)?;

        let elector_handle = self.elector.clone().start(shutdown.clone());
        let scheduler_handle = self.scheduler.clone().start(shutdown.clone());

        let app = api::routes(self.state, &self.config.cors_origins);
        info!(addr = %addr, node = %self.config.node_id, "Control API listening");

        let graceful = shutdown.clone();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.wait().await })
            .await
        {
            error!("Control API server error: {e}");
        }
        // The server can also stop on its own; make sure the loops follow.
        shutdown.trigger();

        for result in join_all([elector_handle, scheduler_handle]).await {
            if let Err(e) = result {
                error!("Background task panicked: {e}");
            }
        }
        info!("Manager stopped");
        Ok(())
    }
}

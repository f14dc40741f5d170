//! Leader election over a store lease.
//!
//! Every poll the elector tries to take or renew the `scheduler` lease. The
//! lease outlives three missed polls, so a crashed leader is replaced within
//! that window. Any store error makes this node a follower until the next
//! successful attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::shutdown::Shutdown;
use crate::store::Database;

/// Name of the lease guarding the scheduler.
pub const LEASE_NAME: &str = "scheduler";

/// Wait after a failed attempt.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct LeaderElector {
    store: Arc<dyn Database>,
    node_id: String,
    poll_interval: Duration,
    is_leader: AtomicBool,
}

impl LeaderElector {
    pub fn new(store: Arc<dyn Database>, node_id: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            poll_interval,
            is_leader: AtomicBool::new(false),
        }
    }

    /// Current belief. Callers must re-read this every cycle.
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn lease_ttl(&self) -> Duration {
        self.poll_interval * 3
    }

    /// One acquisition attempt. Returns whether this node is now leader.
    pub async fn try_acquire(&self) -> Result<bool, crate::error::DatabaseError> {
        let result = self
            .store
            .try_acquire_lease(LEASE_NAME, &self.node_id, self.lease_ttl())
            .await;

        let got = match result {
            Ok(got) => got,
            Err(e) => {
                if self.is_leader.swap(false, Ordering::SeqCst) {
                    warn!(node = %self.node_id, "Leadership dropped after store error");
                }
                return Err(e);
            }
        };

        let was = self.is_leader.swap(got, Ordering::SeqCst);
        match (was, got) {
            (false, true) => info!(node = %self.node_id, "Acquired leader lease"),
            (true, false) => warn!(node = %self.node_id, "Lost leader lease"),
            _ => debug!(node = %self.node_id, leader = got, "Leader lease unchanged"),
        }
        Ok(got)
    }

    /// Step down and release the lease if we hold it.
    pub async fn stop(&self) {
        if self.is_leader.swap(false, Ordering::SeqCst) {
            match self.store.release_lease(LEASE_NAME, &self.node_id).await {
                Ok(()) => info!(node = %self.node_id, "Released leader lease"),
                Err(e) => error!(node = %self.node_id, "Failed to release leader lease: {e}"),
            }
        }
    }

    /// Spawn the election loop. It steps down when `shutdown` fires.
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(node = %self.node_id, poll = ?self.poll_interval, "Leader elector started");

            while !shutdown.is_triggered() {
                let wait = match self.try_acquire().await {
                    Ok(_) => self.poll_interval,
                    Err(e) => {
                        error!(node = %self.node_id, "Leader election attempt failed: {e}");
                        ERROR_BACKOFF
                    }
                };
                if !shutdown.sleep(wait).await {
                    break;
                }
            }

            self.stop().await;
            info!(node = %self.node_id, "Leader elector stopped");
        })
    }
}
